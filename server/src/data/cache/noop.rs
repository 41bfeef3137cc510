//! No-op message cache for cache-disabled deployments
//!
//! Accepts every write and remembers nothing: replay is always empty, no
//! message is ever due, quotas read as zero.

use std::collections::HashMap;

use async_trait::async_trait;

use super::backend::MessageCache;
use super::error::CacheError;
use crate::domain::message::Message;
use crate::domain::since::SinceMarker;

#[derive(Default)]
pub struct NoopCache;

impl NoopCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageCache for NoopCache {
    async fn add_message(&self, _message: &Message) -> Result<(), CacheError> {
        Ok(())
    }

    async fn messages(
        &self,
        _topic: &str,
        _since: &SinceMarker,
        _include_scheduled: bool,
    ) -> Result<Vec<Message>, CacheError> {
        Ok(Vec::new())
    }

    async fn message_count(&self, _topic: &str) -> Result<usize, CacheError> {
        Ok(0)
    }

    async fn message_counts(&self) -> Result<HashMap<String, usize>, CacheError> {
        Ok(HashMap::new())
    }

    async fn topics(&self) -> Result<Vec<String>, CacheError> {
        Ok(Vec::new())
    }

    async fn messages_due(&self) -> Result<Vec<Message>, CacheError> {
        Ok(Vec::new())
    }

    async fn mark_published(&self, _id: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn prune(&self, _older_than: u64) -> Result<usize, CacheError> {
        Ok(0)
    }

    async fn attachments_expired(&self) -> Result<Vec<String>, CacheError> {
        Ok(Vec::new())
    }

    async fn mark_attachments_evicted(&self, _ids: &[String]) -> Result<(), CacheError> {
        Ok(())
    }

    async fn attachment_bytes(&self, _owner: &str) -> Result<u64, CacheError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_remembers_nothing() {
        let cache = NoopCache::new();
        cache.add_message(&Message::new("t")).await.unwrap();

        assert!(
            cache
                .messages("t", &SinceMarker::All, true)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(cache.message_count("t").await.unwrap(), 0);
        assert!(cache.topics().await.unwrap().is_empty());
        assert!(cache.messages_due().await.unwrap().is_empty());
    }
}
