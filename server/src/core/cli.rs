use clap::Parser;

use super::constants::{
    ENV_ATTACHMENT_CACHE_DIR, ENV_BASE_URL, ENV_BEHIND_PROXY, ENV_CACHE_DURATION, ENV_HOST,
    ENV_PORT, ENV_VISITOR_EXEMPT_IPS, ENV_WEB_ROOT,
};

#[derive(Parser, Debug, Default)]
#[command(name = "courier")]
#[command(version, about = "Simple HTTP pub/sub notification server", long_about = None)]
pub struct Cli {
    /// Server host address
    #[arg(long, short = 'H', env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', env = ENV_PORT)]
    pub port: Option<u16>,

    /// Externally visible base URL (required for attachments)
    #[arg(long, env = ENV_BASE_URL)]
    pub base_url: Option<String>,

    /// Trust the X-Forwarded-For header for visitor identity
    #[arg(long, env = ENV_BEHIND_PROXY)]
    pub behind_proxy: bool,

    /// Message cache retention in seconds (0 disables caching)
    #[arg(long, env = ENV_CACHE_DURATION)]
    pub cache_duration: Option<u64>,

    /// Directory for attachment blobs (unset disables attachments)
    #[arg(long, env = ENV_ATTACHMENT_CACHE_DIR)]
    pub attachment_cache_dir: Option<String>,

    /// Comma-separated IPs exempt from rate limiting
    #[arg(long, env = ENV_VISITOR_EXEMPT_IPS, value_delimiter = ',')]
    pub visitor_exempt_ips: Vec<String>,

    /// Web root behavior: app, home or disable
    #[arg(long, env = ENV_WEB_ROOT)]
    pub web_root: Option<String>,

    /// Maximum number of concurrent topics
    #[arg(long)]
    pub total_topic_limit: Option<usize>,

    /// Maximum concurrent subscriptions per visitor
    #[arg(long)]
    pub visitor_subscription_limit: Option<u64>,

    /// Per-file attachment size cap in bytes
    #[arg(long)]
    pub attachment_file_size_limit: Option<u64>,

    /// Total live attachment bytes per visitor
    #[arg(long)]
    pub attachment_total_size_limit: Option<u64>,

    /// Keepalive interval for streaming connections in seconds
    #[arg(long)]
    pub keepalive_interval: Option<u64>,
}

pub fn parse() -> Cli {
    Cli::parse()
}
