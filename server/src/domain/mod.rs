//! Domain model: messages, topics, visitors, replay markers

pub mod message;
pub mod since;
pub mod topic;
pub mod visitor;

pub use message::{Attachment, Event, Message, now_unix, random_message_id};
pub use since::SinceMarker;
pub use topic::{Topic, TopicError, TopicRegistry, validate_topic_id};
pub use visitor::{Visitor, VisitorError, VisitorManager, client_ip};
