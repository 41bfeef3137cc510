//! Message cache trait definition
//!
//! The cache stores committed messages for replay, holds scheduled messages
//! until they are due, and indexes attachment metadata for expiry and quota
//! accounting. Implementations must be safe to share across tasks.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::CacheError;
use crate::domain::message::Message;
use crate::domain::since::SinceMarker;

#[async_trait]
pub trait MessageCache: Send + Sync {
    /// Store a committed message. Scheduled messages (future `time`) are held
    /// back from replay until due and from [`messages_due`] after
    /// [`mark_published`].
    async fn add_message(&self, message: &Message) -> Result<(), CacheError>;

    /// Messages of a topic matching the replay cursor, ascending by time.
    /// `SinceMarker::None` yields nothing. Scheduled messages are excluded
    /// unless `include_scheduled`.
    async fn messages(
        &self,
        topic: &str,
        since: &SinceMarker,
        include_scheduled: bool,
    ) -> Result<Vec<Message>, CacheError>;

    /// Number of cached messages for one topic
    async fn message_count(&self, topic: &str) -> Result<usize, CacheError>;

    /// Cached message count per topic, for topic pruning
    async fn message_counts(&self) -> Result<HashMap<String, usize>, CacheError>;

    /// Topic ids known to the cache, for reseeding the registry at startup
    async fn topics(&self) -> Result<Vec<String>, CacheError>;

    /// Scheduled messages that are due (`time <= now`) and not yet published
    async fn messages_due(&self) -> Result<Vec<Message>, CacheError>;

    /// Mark a scheduled message as delivered. Idempotent by id.
    async fn mark_published(&self, id: &str) -> Result<(), CacheError>;

    /// Drop messages with `time` older than the given unix timestamp.
    /// Returns the number removed.
    async fn prune(&self, older_than: u64) -> Result<usize, CacheError>;

    /// Ids of messages whose attachment is past `expires` and whose blob has
    /// not been evicted yet
    async fn attachments_expired(&self) -> Result<Vec<String>, CacheError>;

    /// Record that the blobs for these message ids were evicted, so their
    /// sizes stop counting against the owner quota
    async fn mark_attachments_evicted(&self, ids: &[String]) -> Result<(), CacheError>;

    /// Total bytes of live (unexpired, unevicted) attachments owned by a
    /// visitor
    async fn attachment_bytes(&self, owner: &str) -> Result<u64, CacheError>;
}
