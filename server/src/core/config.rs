use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

use super::cli::Cli;
use super::constants::{
    DEFAULT_ATTACHMENT_EXPIRY_SECS, DEFAULT_ATTACHMENT_FILE_SIZE_LIMIT,
    DEFAULT_AT_SENDER_INTERVAL_SECS, DEFAULT_CACHE_DURATION_SECS, DEFAULT_HOST,
    DEFAULT_KEEPALIVE_INTERVAL_SECS, DEFAULT_MANAGER_INTERVAL_SECS, DEFAULT_MAX_DELAY_SECS,
    DEFAULT_MESSAGE_LIMIT, DEFAULT_MIN_DELAY_SECS, DEFAULT_PONG_GRACE_SECS, DEFAULT_PORT,
    DEFAULT_RELAY_KEEPALIVE_INTERVAL_SECS, DEFAULT_SUBSCRIPTION_TOPIC_LIMIT,
    DEFAULT_TOTAL_TOPIC_LIMIT, DEFAULT_VISITOR_ATTACHMENT_BANDWIDTH_LIMIT,
    DEFAULT_VISITOR_ATTACHMENT_TOTAL_SIZE_LIMIT, DEFAULT_VISITOR_EMAIL_LIMIT_BURST,
    DEFAULT_VISITOR_EMAIL_LIMIT_REPLENISH_SECS, DEFAULT_VISITOR_EXPUNGE_AFTER_SECS,
    DEFAULT_VISITOR_REQUEST_LIMIT_BURST, DEFAULT_VISITOR_REQUEST_LIMIT_REPLENISH_SECS,
    DEFAULT_VISITOR_SUBSCRIPTION_LIMIT,
};

/// What `GET /` serves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WebRoot {
    /// Redirect to the web app
    #[default]
    App,
    /// Plain landing page
    Home,
    /// Root returns 404
    Disabled,
}

impl fmt::Display for WebRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebRoot::App => write!(f, "app"),
            WebRoot::Home => write!(f, "home"),
            WebRoot::Disabled => write!(f, "disable"),
        }
    }
}

impl WebRoot {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "app" => Ok(Self::App),
            "home" => Ok(Self::Home),
            "disable" | "disabled" => Ok(Self::Disabled),
            other => bail!("invalid web root {other:?}, expected app, home or disable"),
        }
    }
}

/// Typed server configuration, resolved from CLI flags and environment
/// variables over compiled-in defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Externally visible base URL, no trailing slash. Attachments require it.
    pub base_url: Option<String>,
    pub behind_proxy: bool,
    pub web_root: WebRoot,

    /// Retention window of the message cache. `None` disables caching.
    pub cache_duration: Option<Duration>,

    pub message_limit: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,

    pub total_topic_limit: usize,
    pub subscription_topic_limit: usize,

    pub keepalive_interval: Duration,
    pub pong_grace: Duration,

    pub manager_interval: Duration,
    pub at_sender_interval: Duration,
    pub relay_keepalive_interval: Duration,

    /// Directory for attachment blobs. `None` disables attachments.
    pub attachment_cache_dir: Option<PathBuf>,
    pub attachment_file_size_limit: u64,
    pub attachment_total_size_limit: u64,
    pub attachment_expiry: Duration,

    pub visitor_request_limit_burst: u64,
    pub visitor_request_limit_replenish: Duration,
    pub visitor_email_limit_burst: u64,
    pub visitor_email_limit_replenish: Duration,
    pub visitor_subscription_limit: u64,
    pub visitor_attachment_bandwidth_limit: u64,
    pub visitor_expunge_after: Duration,
    pub visitor_exempt_ips: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            base_url: None,
            behind_proxy: false,
            web_root: WebRoot::default(),
            cache_duration: Some(Duration::from_secs(DEFAULT_CACHE_DURATION_SECS)),
            message_limit: DEFAULT_MESSAGE_LIMIT,
            min_delay: Duration::from_secs(DEFAULT_MIN_DELAY_SECS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            total_topic_limit: DEFAULT_TOTAL_TOPIC_LIMIT,
            subscription_topic_limit: DEFAULT_SUBSCRIPTION_TOPIC_LIMIT,
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_INTERVAL_SECS),
            pong_grace: Duration::from_secs(DEFAULT_PONG_GRACE_SECS),
            manager_interval: Duration::from_secs(DEFAULT_MANAGER_INTERVAL_SECS),
            at_sender_interval: Duration::from_secs(DEFAULT_AT_SENDER_INTERVAL_SECS),
            relay_keepalive_interval: Duration::from_secs(DEFAULT_RELAY_KEEPALIVE_INTERVAL_SECS),
            attachment_cache_dir: None,
            attachment_file_size_limit: DEFAULT_ATTACHMENT_FILE_SIZE_LIMIT,
            attachment_total_size_limit: DEFAULT_VISITOR_ATTACHMENT_TOTAL_SIZE_LIMIT,
            attachment_expiry: Duration::from_secs(DEFAULT_ATTACHMENT_EXPIRY_SECS),
            visitor_request_limit_burst: DEFAULT_VISITOR_REQUEST_LIMIT_BURST,
            visitor_request_limit_replenish: Duration::from_secs(
                DEFAULT_VISITOR_REQUEST_LIMIT_REPLENISH_SECS,
            ),
            visitor_email_limit_burst: DEFAULT_VISITOR_EMAIL_LIMIT_BURST,
            visitor_email_limit_replenish: Duration::from_secs(
                DEFAULT_VISITOR_EMAIL_LIMIT_REPLENISH_SECS,
            ),
            visitor_subscription_limit: DEFAULT_VISITOR_SUBSCRIPTION_LIMIT,
            visitor_attachment_bandwidth_limit: DEFAULT_VISITOR_ATTACHMENT_BANDWIDTH_LIMIT,
            visitor_expunge_after: Duration::from_secs(DEFAULT_VISITOR_EXPUNGE_AFTER_SECS),
            visitor_exempt_ips: Vec::new(),
        }
    }
}

impl Config {
    /// Resolve configuration from parsed CLI arguments.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = &cli.host {
            config.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(base_url) = &cli.base_url {
            let trimmed = base_url.trim_end_matches('/');
            if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
                bail!("base URL must start with http:// or https://");
            }
            config.base_url = Some(trimmed.to_string());
        }
        config.behind_proxy = cli.behind_proxy;
        if let Some(web_root) = &cli.web_root {
            config.web_root = WebRoot::parse(web_root)?;
        }
        if let Some(secs) = cli.cache_duration {
            config.cache_duration = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(dir) = &cli.attachment_cache_dir {
            config.attachment_cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(limit) = cli.total_topic_limit {
            config.total_topic_limit = limit;
        }
        if let Some(limit) = cli.visitor_subscription_limit {
            config.visitor_subscription_limit = limit;
        }
        if let Some(limit) = cli.attachment_file_size_limit {
            config.attachment_file_size_limit = limit;
        }
        if let Some(limit) = cli.attachment_total_size_limit {
            config.attachment_total_size_limit = limit;
        }
        if let Some(secs) = cli.keepalive_interval {
            config.keepalive_interval = Duration::from_secs(secs);
        }
        config.visitor_exempt_ips = cli
            .visitor_exempt_ips
            .iter()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.min_delay > self.max_delay {
            bail!("minimum delay exceeds maximum delay");
        }
        if self.attachment_cache_dir.is_some() && self.base_url.is_none() {
            bail!("attachments require a base URL to synthesize download links");
        }
        if let Some(retention) = self.cache_duration
            && self.attachment_expiry > retention
        {
            bail!("attachment expiry exceeds message cache retention");
        }
        Ok(())
    }

    /// Whether attachments can be ingested at all.
    pub fn attachments_enabled(&self) -> bool {
        self.attachment_cache_dir.is_some() && self.base_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.message_limit, DEFAULT_MESSAGE_LIMIT);
        assert!(config.cache_duration.is_some());
        assert!(!config.attachments_enabled());
    }

    #[test]
    fn test_load_strips_trailing_slash() {
        let cli = Cli {
            base_url: Some("https://push.example.com/".to_string()),
            ..Cli::default()
        };
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://push.example.com"));
    }

    #[test]
    fn test_load_rejects_bad_base_url() {
        let cli = Cli {
            base_url: Some("push.example.com".to_string()),
            ..Cli::default()
        };
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    fn test_cache_duration_zero_disables() {
        let cli = Cli {
            cache_duration: Some(0),
            ..Cli::default()
        };
        let config = Config::load(&cli).unwrap();
        assert!(config.cache_duration.is_none());
    }

    #[test]
    fn test_attachments_require_base_url() {
        let cli = Cli {
            attachment_cache_dir: Some("/tmp/attachments".to_string()),
            ..Cli::default()
        };
        assert!(Config::load(&cli).is_err());
    }

    #[test]
    fn test_web_root_parse() {
        assert_eq!(WebRoot::parse("app").unwrap(), WebRoot::App);
        assert_eq!(WebRoot::parse("home").unwrap(), WebRoot::Home);
        assert_eq!(WebRoot::parse("disable").unwrap(), WebRoot::Disabled);
        assert!(WebRoot::parse("nope").is_err());
    }
}
