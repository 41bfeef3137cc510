//! Outbound delivery seams
//!
//! External mirrors are capability traits injected at construction: a push
//! relay (e.g. an FCM bridge) that mirrors every fanned-out message, and a
//! mailer for the `email` publish parameter. Failures are logged by the
//! callers and never interrupt the publish response.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::message::Message;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("relay unavailable: {0}")]
    Unavailable(String),
}

/// Mirrors fanned-out messages to an external push network.
#[async_trait]
pub trait PushRelay: Send + Sync {
    async fn publish(&self, message: &Message) -> Result<(), RelayError>;

    /// Synthetic keepalive on the reserved control topic
    async fn keepalive(&self) -> Result<(), RelayError>;
}

/// Sends a published message as an email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, sender_ip: &str, message: &Message, to: &str) -> Result<(), RelayError>;
}
