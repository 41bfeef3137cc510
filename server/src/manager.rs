//! Background manager loops
//!
//! Three long-lived tasks, each an interval loop that exits on the shared
//! shutdown signal: pruning (visitors, expired attachments, old messages,
//! idle topics), the scheduled-message sender, and the relay keepalive.
//! Per-item failures are logged and never stop a loop; an unsent scheduled
//! message simply retries on the next tick because `mark_published` only
//! runs after a successful send.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::Config;
use crate::core::constants::CONTROL_TOPIC;
use crate::data::cache::MessageCache;
use crate::data::files::FileCache;
use crate::data::relay::PushRelay;
use crate::domain::message::now_unix;
use crate::domain::topic::TopicRegistry;
use crate::domain::visitor::VisitorManager;

pub struct Manager {
    config: Arc<Config>,
    topics: Arc<TopicRegistry>,
    visitors: Arc<VisitorManager>,
    cache: Arc<dyn MessageCache>,
    files: Option<Arc<dyn FileCache>>,
    relay: Option<Arc<dyn PushRelay>>,
}

impl Manager {
    pub fn new(
        config: Arc<Config>,
        topics: Arc<TopicRegistry>,
        visitors: Arc<VisitorManager>,
        cache: Arc<dyn MessageCache>,
        files: Option<Arc<dyn FileCache>>,
        relay: Option<Arc<dyn PushRelay>>,
    ) -> Self {
        Self {
            config,
            topics,
            visitors,
            cache,
            files,
            relay,
        }
    }

    /// Pruning loop: stale visitors, expired attachments, old messages,
    /// idle topics, plus a one-line stats summary.
    pub fn start_pruning_task(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = manager.config.manager_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.reset();
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => manager.prune_once().await,
                }
            }
        })
    }

    async fn prune_once(&self) {
        let expunged = self.visitors.prune_stale();

        if let Some(files) = &self.files {
            match self.cache.attachments_expired().await {
                Ok(expired) if !expired.is_empty() => {
                    if let Err(e) = files.remove(&expired).await {
                        tracing::warn!(error = %e, "Attachment eviction failed");
                    } else if let Err(e) = self.cache.mark_attachments_evicted(&expired).await {
                        tracing::warn!(error = %e, "Marking evicted attachments failed");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Attachment expiry query failed"),
            }
        }

        let mut pruned_messages = 0;
        if let Some(retention) = self.config.cache_duration {
            let cutoff = now_unix().saturating_sub(retention.as_secs());
            match self.cache.prune(cutoff).await {
                Ok(n) => pruned_messages = n,
                Err(e) => tracing::warn!(error = %e, "Message prune failed"),
            }
        }

        let pruned_topics = match self.cache.message_counts().await {
            Ok(counts) => self.topics.prune(&counts),
            Err(e) => {
                tracing::warn!(error = %e, "Message count query failed");
                0
            }
        };

        let attachment_bytes = match &self.files {
            Some(files) => files.size().await.unwrap_or(0),
            None => 0,
        };
        tracing::debug!(
            topics = self.topics.len(),
            visitors = self.visitors.len(),
            expunged_visitors = expunged,
            pruned_messages,
            pruned_topics,
            attachment_bytes,
            "Manager tick"
        );
    }

    /// Scheduled-message sender: fan out due messages, mirror to the relay,
    /// then mark them published.
    pub fn start_at_sender_task(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = manager.config.at_sender_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.reset();
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => manager.send_due_once().await,
                }
            }
        })
    }

    async fn send_due_once(&self) {
        let due = match self.cache.messages_due().await {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "Scheduled-message query failed");
                return;
            }
        };

        for message in due {
            if let Some(topic) = self.topics.get(&message.topic) {
                topic.publish(&message);
            }
            if let Some(relay) = &self.relay
                && let Err(e) = relay.publish(&message).await
            {
                tracing::warn!(error = %e, id = %message.id, "Relay mirror failed");
            }
            if let Err(e) = self.cache.mark_published(&message.id).await {
                // Not marked: the message comes back next tick
                tracing::warn!(error = %e, id = %message.id, "Marking scheduled message failed");
                continue;
            }
            tracing::debug!(id = %message.id, topic = %message.topic, "Scheduled message sent");
        }
    }

    /// Relay keepalive: synthetic event on the reserved control topic.
    pub fn start_relay_keepalive_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let relay = self.relay.clone()?;
        let period = self.config.relay_keepalive_interval;
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.reset();
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = relay.keepalive().await {
                            tracing::warn!(error = %e, topic = CONTROL_TOPIC, "Relay keepalive failed");
                        }
                    }
                }
            }
        }))
    }
}
