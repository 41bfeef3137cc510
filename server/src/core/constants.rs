// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Courier";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "courier";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "COURIER_LOG";

/// Environment variable for server host
pub const ENV_HOST: &str = "COURIER_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "COURIER_PORT";

/// Environment variable for the externally visible base URL
pub const ENV_BASE_URL: &str = "COURIER_BASE_URL";

/// Environment variable for proxy trust (X-Forwarded-For)
pub const ENV_BEHIND_PROXY: &str = "COURIER_BEHIND_PROXY";

/// Environment variable for the message cache retention window (seconds)
pub const ENV_CACHE_DURATION: &str = "COURIER_CACHE_DURATION";

/// Environment variable for the attachment cache directory
pub const ENV_ATTACHMENT_CACHE_DIR: &str = "COURIER_ATTACHMENT_CACHE_DIR";

/// Environment variable for rate-limit exempt IPs (comma-separated)
pub const ENV_VISITOR_EXEMPT_IPS: &str = "COURIER_VISITOR_EXEMPT_IPS";

/// Environment variable for the web root mode (app, home, disable)
pub const ENV_WEB_ROOT: &str = "COURIER_WEB_ROOT";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 2586;

// =============================================================================
// Message Defaults
// =============================================================================

/// Length of generated message ids
pub const MESSAGE_ID_LENGTH: usize = 10;

/// Body text substituted when a publish carries neither text nor attachment
pub const DEFAULT_MESSAGE_BODY: &str = "triggered";

/// Default message priority (1 lowest, 5 highest)
pub const DEFAULT_PRIORITY: u8 = 3;

/// Maximum peeked body size for message classification (bytes)
pub const DEFAULT_MESSAGE_LIMIT: usize = 4096;

/// Default message cache retention (seconds)
pub const DEFAULT_CACHE_DURATION_SECS: u64 = 12 * 3600;

/// Minimum accepted scheduled-delivery delay (seconds)
pub const DEFAULT_MIN_DELAY_SECS: u64 = 10;

/// Maximum accepted scheduled-delivery delay (seconds)
pub const DEFAULT_MAX_DELAY_SECS: u64 = 3 * 24 * 3600;

// =============================================================================
// Topic Defaults
// =============================================================================

/// Maximum number of concurrent topics
pub const DEFAULT_TOTAL_TOPIC_LIMIT: usize = 15_000;

/// Maximum comma-separated topics per subscription
pub const DEFAULT_SUBSCRIPTION_TOPIC_LIMIT: usize = 15;

/// Per-subscriber delivery queue depth; a full queue drops the subscriber
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 128;

/// Topic ids rejected at the router (they shadow server routes)
pub const DISALLOWED_TOPICS: &[&str] = &["docs", "static", "file", "app", "settings"];

/// Reserved control topic used for relay keepalives
pub const CONTROL_TOPIC: &str = "~control";

// =============================================================================
// Streaming Defaults
// =============================================================================

/// Interval between keepalive events on streaming connections (seconds)
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 45;

/// Extra time granted for a WebSocket pong after a ping (seconds)
pub const DEFAULT_PONG_GRACE_SECS: u64 = 15;

// =============================================================================
// Visitor / Rate Limit Defaults
// =============================================================================

/// Request token bucket burst
pub const DEFAULT_VISITOR_REQUEST_LIMIT_BURST: u64 = 60;

/// Seconds to replenish one request token
pub const DEFAULT_VISITOR_REQUEST_LIMIT_REPLENISH_SECS: u64 = 5;

/// Email token bucket burst
pub const DEFAULT_VISITOR_EMAIL_LIMIT_BURST: u64 = 16;

/// Seconds to replenish one email token
pub const DEFAULT_VISITOR_EMAIL_LIMIT_REPLENISH_SECS: u64 = 3600;

/// Maximum concurrent subscriptions per visitor
pub const DEFAULT_VISITOR_SUBSCRIPTION_LIMIT: u64 = 30;

/// Attachment download bandwidth per visitor (bytes, bucket capacity)
pub const DEFAULT_VISITOR_ATTACHMENT_BANDWIDTH_LIMIT: u64 = 500 * 1024 * 1024;

/// Total bytes of live attachments a single visitor may own
pub const DEFAULT_VISITOR_ATTACHMENT_TOTAL_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

/// Idle time after which a visitor is expunged (seconds)
pub const DEFAULT_VISITOR_EXPUNGE_AFTER_SECS: u64 = 24 * 3600;

// =============================================================================
// Attachment Defaults
// =============================================================================

/// Per-file attachment size cap (bytes)
pub const DEFAULT_ATTACHMENT_FILE_SIZE_LIMIT: u64 = 15 * 1024 * 1024;

/// Attachment lifetime from ingestion (seconds)
pub const DEFAULT_ATTACHMENT_EXPIRY_SECS: u64 = 3 * 3600;

// =============================================================================
// Manager Defaults
// =============================================================================

/// Interval of the pruning manager loop (seconds)
pub const DEFAULT_MANAGER_INTERVAL_SECS: u64 = 60;

/// Interval of the scheduled-message sender loop (seconds)
pub const DEFAULT_AT_SENDER_INTERVAL_SECS: u64 = 10;

/// Interval of the relay keepalive loop (seconds)
pub const DEFAULT_RELAY_KEEPALIVE_INTERVAL_SECS: u64 = 3 * 3600;

// =============================================================================
// HTTP Defaults
// =============================================================================

/// Slack added on top of the attachment cap for the request body limit
pub const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Seconds to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
