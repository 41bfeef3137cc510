//! In-memory message cache
//!
//! Keeps everything in one mutex-guarded map, topic id → entries in insertion
//! order. Insertion order equals time order for live messages; replay sorts
//! anyway so scheduled messages slot in correctly.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::MessageCache;
use super::error::CacheError;
use crate::domain::message::{Message, now_unix};
use crate::domain::since::SinceMarker;

struct Entry {
    message: Message,
    /// False only while a scheduled message waits for the at-sender
    published: bool,
    /// True once the attachment blob was removed from the file cache
    attachment_evicted: bool,
}

#[derive(Default)]
pub struct MemoryCache {
    topics: Mutex<HashMap<String, Vec<Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageCache for MemoryCache {
    async fn add_message(&self, message: &Message) -> Result<(), CacheError> {
        let scheduled = message.is_scheduled();
        let mut topics = self.topics.lock();
        topics
            .entry(message.topic.clone())
            .or_default()
            .push(Entry {
                message: message.clone(),
                published: !scheduled,
                attachment_evicted: false,
            });
        Ok(())
    }

    async fn messages(
        &self,
        topic: &str,
        since: &SinceMarker,
        include_scheduled: bool,
    ) -> Result<Vec<Message>, CacheError> {
        if since.is_none() {
            return Ok(Vec::new());
        }
        let now = now_unix();
        let topics = self.topics.lock();
        let Some(entries) = topics.get(topic) else {
            return Ok(Vec::new());
        };

        let mut messages: Vec<&Message> = match since {
            SinceMarker::None => unreachable!("handled above"),
            SinceMarker::All => entries.iter().map(|e| &e.message).collect(),
            SinceMarker::Time(t) => entries
                .iter()
                .map(|e| &e.message)
                .filter(|m| m.time >= *t)
                .collect(),
            SinceMarker::Id(id) => {
                let start = entries.iter().position(|e| e.message.id == *id);
                match start {
                    Some(idx) => entries[idx + 1..].iter().map(|e| &e.message).collect(),
                    // Unknown id falls back to full replay
                    None => entries.iter().map(|e| &e.message).collect(),
                }
            }
        };

        if !include_scheduled {
            messages.retain(|m| m.time <= now);
        }
        let mut messages: Vec<Message> = messages.into_iter().cloned().collect();
        messages.sort_by_key(|m| m.time);
        Ok(messages)
    }

    async fn message_count(&self, topic: &str) -> Result<usize, CacheError> {
        Ok(self.topics.lock().get(topic).map_or(0, Vec::len))
    }

    async fn message_counts(&self) -> Result<HashMap<String, usize>, CacheError> {
        Ok(self
            .topics
            .lock()
            .iter()
            .map(|(id, entries)| (id.clone(), entries.len()))
            .collect())
    }

    async fn topics(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.topics.lock().keys().cloned().collect())
    }

    async fn messages_due(&self) -> Result<Vec<Message>, CacheError> {
        let now = now_unix();
        let mut due: Vec<Message> = self
            .topics
            .lock()
            .values()
            .flatten()
            .filter(|e| !e.published && e.message.time <= now)
            .map(|e| e.message.clone())
            .collect();
        due.sort_by_key(|m| m.time);
        Ok(due)
    }

    async fn mark_published(&self, id: &str) -> Result<(), CacheError> {
        let mut topics = self.topics.lock();
        for entries in topics.values_mut() {
            if let Some(entry) = entries.iter_mut().find(|e| e.message.id == id) {
                entry.published = true;
                return Ok(());
            }
        }
        Ok(())
    }

    async fn prune(&self, older_than: u64) -> Result<usize, CacheError> {
        let mut topics = self.topics.lock();
        let mut removed = 0;
        topics.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.message.time >= older_than || !e.published);
            removed += before - entries.len();
            !entries.is_empty()
        });
        Ok(removed)
    }

    async fn attachments_expired(&self) -> Result<Vec<String>, CacheError> {
        let now = now_unix();
        Ok(self
            .topics
            .lock()
            .values()
            .flatten()
            .filter(|e| {
                !e.attachment_evicted
                    && e.message
                        .attachment
                        .as_ref()
                        .is_some_and(|a| a.expires <= now)
            })
            .map(|e| e.message.id.clone())
            .collect())
    }

    async fn mark_attachments_evicted(&self, ids: &[String]) -> Result<(), CacheError> {
        let mut topics = self.topics.lock();
        for entries in topics.values_mut() {
            for entry in entries.iter_mut() {
                if ids.iter().any(|id| *id == entry.message.id) {
                    entry.attachment_evicted = true;
                }
            }
        }
        Ok(())
    }

    async fn attachment_bytes(&self, owner: &str) -> Result<u64, CacheError> {
        let now = now_unix();
        Ok(self
            .topics
            .lock()
            .values()
            .flatten()
            .filter(|e| !e.attachment_evicted)
            .filter_map(|e| e.message.attachment.as_ref())
            .filter(|a| a.owner == owner && a.expires > now)
            .map(|a| a.size)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Attachment;

    fn msg(topic: &str, body: &str) -> Message {
        let mut m = Message::new(topic);
        m.message = body.to_string();
        m
    }

    #[tokio::test]
    async fn test_replay_all_in_order() {
        let cache = MemoryCache::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut m = msg("t", &format!("m{i}"));
            m.time = 1000 + i;
            ids.push(m.id.clone());
            cache.add_message(&m).await.unwrap();
        }

        let replayed = cache.messages("t", &SinceMarker::All, false).await.unwrap();
        assert_eq!(
            replayed.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
            ids
        );
    }

    #[tokio::test]
    async fn test_replay_none_is_empty() {
        let cache = MemoryCache::new();
        cache.add_message(&msg("t", "hi")).await.unwrap();
        let replayed = cache
            .messages("t", &SinceMarker::None, false)
            .await
            .unwrap();
        assert!(replayed.is_empty());
    }

    #[tokio::test]
    async fn test_replay_since_time() {
        let cache = MemoryCache::new();
        let mut old = msg("t", "old");
        old.time = 1000;
        let mut new = msg("t", "new");
        new.time = 2000;
        cache.add_message(&old).await.unwrap();
        cache.add_message(&new).await.unwrap();

        let replayed = cache
            .messages("t", &SinceMarker::Time(1500), false)
            .await
            .unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].message, "new");
    }

    #[tokio::test]
    async fn test_replay_since_id() {
        let cache = MemoryCache::new();
        let first = msg("t", "first");
        let second = msg("t", "second");
        cache.add_message(&first).await.unwrap();
        cache.add_message(&second).await.unwrap();

        let replayed = cache
            .messages("t", &SinceMarker::Id(first.id.clone()), false)
            .await
            .unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, second.id);
    }

    #[tokio::test]
    async fn test_replay_unknown_id_returns_all() {
        let cache = MemoryCache::new();
        cache.add_message(&msg("t", "a")).await.unwrap();
        let replayed = cache
            .messages("t", &SinceMarker::Id("zzzzzzzzzz".to_string()), false)
            .await
            .unwrap();
        assert_eq!(replayed.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_hidden_until_included() {
        let cache = MemoryCache::new();
        let mut scheduled = msg("t", "later");
        scheduled.time = now_unix() + 600;
        cache.add_message(&scheduled).await.unwrap();

        let without = cache.messages("t", &SinceMarker::All, false).await.unwrap();
        assert!(without.is_empty());

        let with = cache.messages("t", &SinceMarker::All, true).await.unwrap();
        assert_eq!(with.len(), 1);
    }

    #[tokio::test]
    async fn test_messages_due_and_mark_published() {
        let cache = MemoryCache::new();
        let mut due = msg("t", "due");
        due.time = now_unix() - 1;
        // Simulate a scheduled insert: published=false requires is_scheduled at add
        let mut pending = msg("t", "pending");
        pending.time = now_unix() + 2;
        cache.add_message(&pending).await.unwrap();
        cache.add_message(&due).await.unwrap();

        // The due message was added as already-published (not scheduled), so
        // only the pending one shows up once its time passes.
        assert!(cache.messages_due().await.unwrap().is_empty());

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        let now_due = cache.messages_due().await.unwrap();
        assert_eq!(now_due.len(), 1);
        assert_eq!(now_due[0].id, pending.id);

        cache.mark_published(&pending.id).await.unwrap();
        assert!(cache.messages_due().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_drops_old_but_keeps_pending_scheduled() {
        let cache = MemoryCache::new();
        let mut old = msg("t", "old");
        old.time = 1000;
        cache.add_message(&old).await.unwrap();
        let mut scheduled = msg("t", "scheduled");
        scheduled.time = now_unix() + 600;
        cache.add_message(&scheduled).await.unwrap();

        let removed = cache.prune(now_unix() - 3600).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.message_count("t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_attachment_accounting() {
        let cache = MemoryCache::new();
        let mut m = msg("t", "file");
        m.attachment = Some(Attachment {
            name: "a.bin".to_string(),
            content_type: "application/octet-stream".to_string(),
            size: 1000,
            expires: now_unix() + 3600,
            url: "https://example.com/file/x".to_string(),
            owner: "10.0.0.1".to_string(),
        });
        cache.add_message(&m).await.unwrap();

        assert_eq!(cache.attachment_bytes("10.0.0.1").await.unwrap(), 1000);
        assert_eq!(cache.attachment_bytes("10.0.0.2").await.unwrap(), 0);
        assert!(cache.attachments_expired().await.unwrap().is_empty());

        // Evicting stops the quota charge
        cache
            .mark_attachments_evicted(&[m.id.clone()])
            .await
            .unwrap();
        assert_eq!(cache.attachment_bytes("10.0.0.1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_attachments_reported_once_evicted_stops() {
        let cache = MemoryCache::new();
        let mut m = msg("t", "file");
        m.attachment = Some(Attachment {
            name: "a.bin".to_string(),
            content_type: String::new(),
            size: 10,
            expires: now_unix() - 1,
            url: String::new(),
            owner: "10.0.0.1".to_string(),
        });
        cache.add_message(&m).await.unwrap();

        let expired = cache.attachments_expired().await.unwrap();
        assert_eq!(expired, vec![m.id.clone()]);

        cache.mark_attachments_evicted(&expired).await.unwrap();
        assert!(cache.attachments_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_topics_and_counts() {
        let cache = MemoryCache::new();
        cache.add_message(&msg("a", "1")).await.unwrap();
        cache.add_message(&msg("a", "2")).await.unwrap();
        cache.add_message(&msg("b", "3")).await.unwrap();

        let mut topics = cache.topics().await.unwrap();
        topics.sort();
        assert_eq!(topics, vec!["a", "b"]);

        let counts = cache.message_counts().await.unwrap();
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 1);
    }
}
