//! Message model and id generation

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::constants::{DEFAULT_PRIORITY, MESSAGE_ID_LENGTH};

const ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Current unix time in seconds
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate a 10-char random alphanumeric message id
pub fn random_message_id() -> String {
    let mut rng = rand::thread_rng();
    (0..MESSAGE_ID_LENGTH)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

/// Check whether a string has the shape of a generated message id
pub fn looks_like_message_id(s: &str) -> bool {
    s.len() == MESSAGE_ID_LENGTH && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Event kind carried on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Open,
    #[default]
    Message,
    Keepalive,
    PollRequest,
}

impl Event {
    /// Wire name of the event kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Open => "open",
            Event::Message => "message",
            Event::Keepalive => "keepalive",
            Event::PollRequest => "poll_request",
        }
    }
}

/// Attachment metadata carried on a message. The blob itself lives in the
/// file cache under the message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    pub size: u64,
    pub expires: u64,
    pub url: String,
    /// Publishing visitor, for quota accounting. Never serialized to clients.
    #[serde(skip)]
    pub owner: String,
}

/// A single published message. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub time: u64,
    pub event: Event,
    pub topic: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub click: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub priority: u8,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<serde_json::Value>,
}

impl Message {
    /// A fresh default-event message for `topic`
    pub fn new(topic: &str) -> Self {
        Self {
            id: random_message_id(),
            time: now_unix(),
            event: Event::Message,
            topic: topic.to_string(),
            message: String::new(),
            title: String::new(),
            click: String::new(),
            tags: Vec::new(),
            priority: DEFAULT_PRIORITY,
            encoding: String::new(),
            attachment: None,
            actions: None,
        }
    }

    /// Synthetic `open` event naming the subscribed topic list
    pub fn open(topics: &str) -> Self {
        Self {
            event: Event::Open,
            ..Self::new(topics)
        }
    }

    /// Synthetic `keepalive` event
    pub fn keepalive(topics: &str) -> Self {
        Self {
            event: Event::Keepalive,
            ..Self::new(topics)
        }
    }

    /// Whether delivery is scheduled for the future
    pub fn is_scheduled(&self) -> bool {
        self.time > now_unix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_shape() {
        let id = random_message_id();
        assert!(looks_like_message_id(&id));

        let other = random_message_id();
        assert_ne!(id, other);
    }

    #[test]
    fn test_looks_like_message_id() {
        assert!(looks_like_message_id("abcDEF1234"));
        assert!(!looks_like_message_id("short"));
        assert!(!looks_like_message_id("toolongtobeanid"));
        assert!(!looks_like_message_id("abc-EF1234"));
    }

    #[test]
    fn test_new_message_defaults() {
        let m = Message::new("mytopic");
        assert_eq!(m.topic, "mytopic");
        assert_eq!(m.event, Event::Message);
        assert_eq!(m.priority, DEFAULT_PRIORITY);
        assert!(m.time > 0);
        assert!(!m.is_scheduled());
    }

    #[test]
    fn test_scheduled_message() {
        let mut m = Message::new("t");
        m.time = now_unix() + 60;
        assert!(m.is_scheduled());
    }

    #[test]
    fn test_wire_format_omits_empty_fields() {
        let m = Message::new("t");
        let json = serde_json::to_value(&m).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("title"));
        assert!(!obj.contains_key("click"));
        assert!(!obj.contains_key("tags"));
        assert!(!obj.contains_key("encoding"));
        assert!(!obj.contains_key("attachment"));
        assert_eq!(obj["event"], "message");
    }

    #[test]
    fn test_event_wire_names() {
        assert_eq!(serde_json::to_string(&Event::Open).unwrap(), "\"open\"");
        assert_eq!(
            serde_json::to_string(&Event::PollRequest).unwrap(),
            "\"poll_request\""
        );
        assert_eq!(
            serde_json::to_string(&Event::Keepalive).unwrap(),
            "\"keepalive\""
        );
    }

    #[test]
    fn test_attachment_owner_not_serialized() {
        let mut m = Message::new("t");
        m.attachment = Some(Attachment {
            name: "flower.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            size: 12_345,
            expires: now_unix() + 3600,
            url: "https://push.example.com/file/abcDEF1234.jpg".to_string(),
            owner: "203.0.113.9".to_string(),
        });
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("flower.jpg"));
        assert!(!json.contains("203.0.113.9"));
    }
}
