//! courier: a simple HTTP pub/sub notification server
//!
//! Clients publish short messages to implicitly created topics; subscribers
//! hold long-lived NDJSON, SSE, raw or WebSocket streams and receive them in
//! near-real-time, with optional caching and replay, scheduled delivery,
//! attachments and per-visitor rate limiting.

pub mod api;
pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod manager;
