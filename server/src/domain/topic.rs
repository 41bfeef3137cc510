//! Topic registry and subscriber fan-out
//!
//! A topic is a named channel with a set of live subscribers. Delivery uses a
//! bounded queue per subscriber: `publish` never blocks and never holds a lock
//! across delivery. A subscriber whose queue is full is dropped (its receiver
//! closes and the connection tears down) so one slow client cannot stall the
//! topic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::mpsc;

use crate::core::constants::{DISALLOWED_TOPICS, SUBSCRIBER_QUEUE_CAPACITY};
use crate::domain::message::{Message, now_unix};

static TOPIC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[-_A-Za-z0-9]{1,64}$").expect("static regex"));

/// Errors from topic lookup and creation
#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("invalid topic id: {0}")]
    InvalidId(String),

    #[error("topic id is reserved: {0}")]
    ReservedId(String),

    #[error("too many topics ({0})")]
    LimitReached(usize),
}

/// Validate a topic id against the id grammar and the reserved-name list.
pub fn validate_topic_id(id: &str) -> Result<(), TopicError> {
    if !TOPIC_ID_RE.is_match(id) {
        return Err(TopicError::InvalidId(id.to_string()));
    }
    if DISALLOWED_TOPICS.contains(&id) {
        return Err(TopicError::ReservedId(id.to_string()));
    }
    Ok(())
}

struct TopicInner {
    next_subscriber_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<Message>>,
}

/// A single topic: subscriber registry plus fan-out.
pub struct Topic {
    id: String,
    inner: Mutex<TopicInner>,
    last_access: Mutex<u64>,
}

impl Topic {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            inner: Mutex::new(TopicInner {
                next_subscriber_id: 0,
                subscribers: HashMap::new(),
            }),
            last_access: Mutex::new(now_unix()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a subscriber; returns its handle id and the delivery queue.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.insert(id, tx);
        *self.last_access.lock() = now_unix();
        (id, rx)
    }

    /// Remove a subscriber. Idempotent.
    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
    }

    /// Fan a message out to every current subscriber.
    ///
    /// Senders are snapshotted under the lock and delivery happens outside it.
    /// Full or closed queues are removed afterwards; a full queue is logged as
    /// a dropped slow subscriber.
    pub fn publish(&self, msg: &Message) {
        let snapshot: Vec<(u64, mpsc::Sender<Message>)> = {
            let inner = self.inner.lock();
            inner
                .subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };
        *self.last_access.lock() = now_unix();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        topic = %self.id,
                        subscriber = id,
                        "Subscriber queue full, dropping slow subscriber"
                    );
                    dead.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut inner = self.inner.lock();
            for id in dead {
                inner.subscribers.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Unix time of the last subscribe or publish
    pub fn last_access(&self) -> u64 {
        *self.last_access.lock()
    }
}

/// Process-wide topic map. The mutex guards only map structure and is never
/// held across I/O or delivery.
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    limit: usize,
}

impl TopicRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            limit,
        }
    }

    /// Look up a topic, creating it if absent. Validates the id.
    pub fn get_or_create(&self, id: &str) -> Result<Arc<Topic>, TopicError> {
        validate_topic_id(id)?;
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get(id) {
            return Ok(Arc::clone(topic));
        }
        if topics.len() >= self.limit {
            return Err(TopicError::LimitReached(self.limit));
        }
        let topic = Arc::new(Topic::new(id));
        topics.insert(id.to_string(), Arc::clone(&topic));
        tracing::debug!(topic = id, "Topic created");
        Ok(topic)
    }

    /// Look up an existing topic without creating it.
    pub fn get(&self, id: &str) -> Option<Arc<Topic>> {
        self.topics.lock().get(id).cloned()
    }

    /// Recreate topics known to the message cache at startup.
    pub fn seed<I: IntoIterator<Item = String>>(&self, ids: I) {
        let mut topics = self.topics.lock();
        for id in ids {
            if validate_topic_id(&id).is_ok() && topics.len() < self.limit {
                topics
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(Topic::new(&id)));
            }
        }
    }

    /// Drop topics with zero subscribers and zero cached messages.
    /// `cached_messages` maps topic id to its cache count.
    pub fn prune(&self, cached_messages: &HashMap<String, usize>) -> usize {
        let mut topics = self.topics.lock();
        let before = topics.len();
        topics.retain(|id, topic| {
            topic.subscriber_count() > 0 || cached_messages.get(id).copied().unwrap_or(0) > 0
        });
        before - topics.len()
    }

    pub fn len(&self) -> usize {
        self.topics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.lock().is_empty()
    }
}
