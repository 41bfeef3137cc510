//! Subscribe pipeline: long-lived HTTP streams
//!
//! A subscriber registers on every requested topic, optionally replays from
//! the cache, then receives live messages until the connection goes away.
//! Keepalive events flow on a fixed interval and double as the visitor's
//! idle-clock refresh.
//!
//! Replay and live delivery can overlap at the boundary because publishes
//! fan out before they hit the cache; clients deduplicate by message id.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use futures::StreamExt;
use futures::stream::SelectAll;
use tokio_stream::wrappers::ReceiverStream;

use super::auth::{Permission, authorize_topics};
use super::params::{FilterSet, param, parse_bool};
use super::server::ServerState;
use super::types::ApiError;
use crate::domain::message::{Event, Message};
use crate::domain::since::SinceMarker;
use crate::domain::topic::{Topic, validate_topic_id};
use crate::domain::visitor::Visitor;

/// Streaming encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Json,
    Sse,
    Raw,
}

impl StreamKind {
    pub fn content_type(self) -> &'static str {
        match self {
            StreamKind::Json => "application/x-ndjson",
            StreamKind::Sse => "text/event-stream",
            StreamKind::Raw => "text/plain",
        }
    }

    /// Encode one event for this stream flavor.
    ///
    /// Raw streams carry only default-event bodies; other events become a
    /// blank line that keeps the connection warm.
    pub fn encode(self, message: &Message) -> String {
        match self {
            StreamKind::Json => {
                let mut line = serde_json::to_string(message).unwrap_or_default();
                line.push('\n');
                line
            }
            StreamKind::Sse => {
                let json = serde_json::to_string(message).unwrap_or_default();
                if message.event == Event::Message {
                    format!("data: {json}\n\n")
                } else {
                    format!("event: {}\ndata: {json}\n\n", message.event.as_str())
                }
            }
            StreamKind::Raw => {
                if message.event == Event::Message {
                    format!("{}\n", message.message.replace('\n', " "))
                } else {
                    "\n".to_string()
                }
            }
        }
    }
}

/// RAII registration: dropping the guard unsubscribes from every topic and
/// releases the visitor's subscription slot. Streams are torn down by drop
/// when the client disconnects, so this must not rely on code after the
/// stream loop running.
pub struct SubscriptionGuard {
    pub(crate) topics: Vec<(Arc<Topic>, u64)>,
    pub(crate) visitor: Arc<Visitor>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        for (topic, subscriber_id) in &self.topics {
            topic.unsubscribe(*subscriber_id);
        }
        self.visitor.remove_subscription();
    }
}

/// Everything a streaming loop needs, assembled before the first byte is
/// written (or before the WebSocket upgrade completes).
pub struct Subscription {
    pub guard: SubscriptionGuard,
    pub live: SelectAll<ReceiverStream<Message>>,
    pub replay: Vec<Message>,
    pub filters: FilterSet,
    pub topic_list: String,
    pub poll: bool,
}

/// Steps 1-6 of the streaming lifecycle: authorize, rate-limit the
/// subscription slot, register on each topic, fetch replay.
pub async fn subscribe(
    state: &ServerState,
    topic_path: &str,
    headers: &axum::http::HeaderMap,
    query: &HashMap<String, String>,
    visitor: &Arc<Visitor>,
) -> Result<Subscription, ApiError> {
    let topic_ids: Vec<&str> = topic_path.split(',').filter(|t| !t.is_empty()).collect();
    if topic_ids.is_empty() {
        return Err(ApiError::invalid_topic(topic_path));
    }
    if topic_ids.len() > state.config.subscription_topic_limit {
        return Err(ApiError::too_many_subscription_topics(
            state.config.subscription_topic_limit,
        ));
    }
    for id in &topic_ids {
        validate_topic_id(id)?;
    }

    authorize_topics(
        state.auther.as_ref(),
        headers,
        query,
        &topic_ids,
        Permission::Read,
    )
    .await?;

    let since = match param(headers, query, &["since"]) {
        Some(value) => SinceMarker::parse(&value)?,
        None => SinceMarker::None,
    };
    let poll = parse_bool(param(headers, query, &["poll", "po"]), false);
    let scheduled = parse_bool(param(headers, query, &["scheduled", "sched"]), false);
    let filters = FilterSet::parse(headers, query)?;

    visitor.add_subscription()?;
    let mut guard = SubscriptionGuard {
        topics: Vec::new(),
        visitor: Arc::clone(visitor),
    };

    let mut live = SelectAll::new();
    for id in &topic_ids {
        let topic = match state.topics.get_or_create(id) {
            Ok(topic) => topic,
            // Guard rolls back the already-registered topics
            Err(e) => return Err(e.into()),
        };
        let (subscriber_id, rx) = topic.subscribe();
        guard.topics.push((Arc::clone(&topic), subscriber_id));
        live.push(ReceiverStream::new(rx));
    }

    let mut replay = Vec::new();
    if !since.is_none() {
        for id in &topic_ids {
            replay.extend(state.cache.messages(id, &since, scheduled).await?);
        }
        replay.sort_by_key(|m| m.time);
    }

    Ok(Subscription {
        guard,
        live,
        replay,
        filters,
        topic_list: topic_ids.join(","),
        poll,
    })
}

/// `GET /{topics}/{json|sse|raw}`
pub async fn stream(
    state: &ServerState,
    topic_path: &str,
    kind: StreamKind,
    headers: &axum::http::HeaderMap,
    query: &HashMap<String, String>,
    visitor: &Arc<Visitor>,
) -> Result<Response, ApiError> {
    let subscription = subscribe(state, topic_path, headers, query, visitor).await?;

    if subscription.poll {
        let mut body = String::new();
        for message in &subscription.replay {
            if subscription.filters.matches(message) {
                body.push_str(&kind.encode(message));
            }
        }
        return Response::builder()
            .header(CONTENT_TYPE, kind.content_type())
            .body(Body::from(body))
            .map_err(|_| ApiError::internal());
    }

    let keepalive_interval = state.config.keepalive_interval;
    let mut shutdown_rx = state.shutdown_rx.clone();

    let Subscription {
        guard,
        mut live,
        replay,
        filters,
        topic_list,
        ..
    } = subscription;

    let stream = async_stream::stream! {
        // Moved in so the drop runs when the client disconnects
        let _guard = guard;

        yield Ok::<String, std::convert::Infallible>(kind.encode(&Message::open(&topic_list)));
        for message in &replay {
            if filters.matches(message) {
                yield Ok(kind.encode(message));
            }
        }

        let mut keepalive = tokio::time::interval(keepalive_interval);
        keepalive.reset();

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = keepalive.tick() => {
                    _guard.visitor.keepalive();
                    yield Ok(kind.encode(&Message::keepalive(&topic_list)));
                }
                message = live.next() => {
                    match message {
                        Some(message) if filters.matches(&message) => {
                            yield Ok(kind.encode(&message));
                        }
                        Some(_) => {}
                        // All senders gone: subscriber was dropped as too slow
                        None => break,
                    }
                }
            }
        }
    };

    Response::builder()
        .header(CONTENT_TYPE, kind.content_type())
        .body(Body::from_stream(stream))
        .map_err(|_| ApiError::internal())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(StreamKind::Json.content_type(), "application/x-ndjson");
        assert_eq!(StreamKind::Sse.content_type(), "text/event-stream");
        assert_eq!(StreamKind::Raw.content_type(), "text/plain");
    }

    #[test]
    fn test_json_encoding_is_one_line() {
        let mut m = Message::new("t");
        m.message = "hello".to_string();
        let line = StreamKind::Json.encode(&m);
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: Message = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed.message, "hello");
    }

    #[test]
    fn test_sse_default_event_has_no_event_line() {
        let mut m = Message::new("t");
        m.message = "hi".to_string();
        let encoded = StreamKind::Sse.encode(&m);
        assert!(encoded.starts_with("data: "));
        assert!(!encoded.contains("event:"));
        assert!(encoded.ends_with("\n\n"));
    }

    #[test]
    fn test_sse_open_event_named() {
        let encoded = StreamKind::Sse.encode(&Message::open("t"));
        assert!(encoded.starts_with("event: open\n"));
    }

    #[test]
    fn test_raw_flattens_newlines() {
        let mut m = Message::new("t");
        m.message = "line one\nline two".to_string();
        assert_eq!(StreamKind::Raw.encode(&m), "line one line two\n");
    }

    #[test]
    fn test_raw_non_message_events_blank_line() {
        assert_eq!(StreamKind::Raw.encode(&Message::keepalive("t")), "\n");
        assert_eq!(StreamKind::Raw.encode(&Message::open("t")), "\n");
    }
}
