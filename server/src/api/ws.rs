//! WebSocket subscriber sessions
//!
//! Same pipeline as the HTTP streams, but each message goes out as one JSON
//! text frame. Reader and writer run as two halves of a `tokio::select!`:
//! either side ending tears the whole session down. The writer sends a Ping
//! on every keepalive tick; the reader requires some inbound frame (a Pong at
//! minimum) within `keepalive_interval + pong_grace`, otherwise the session
//! is considered dead.
//!
//! Errors after the upgrade have no response body to write to; they are
//! logged and the socket is closed. Normal close frames are not errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::watch;

use super::server::ServerState;
use super::subscribe::{Subscription, subscribe};
use super::types::ApiError;
use crate::domain::message::Message;
use crate::domain::visitor::Visitor;

/// `GET /{topics}/ws`
pub async fn stream_ws(
    state: &ServerState,
    topic_path: &str,
    headers: &axum::http::HeaderMap,
    query: &HashMap<String, String>,
    visitor: &Arc<Visitor>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // Authorize and register before completing the upgrade, so refusals still
    // produce a proper JSON error response.
    let subscription = subscribe(state, topic_path, headers, query, visitor).await?;

    let keepalive_interval = state.config.keepalive_interval;
    let pong_grace = state.config.pong_grace;
    let shutdown_rx = state.shutdown_rx.clone();

    Ok(upgrade.on_upgrade(move |socket| {
        session(
            socket,
            subscription,
            keepalive_interval,
            pong_grace,
            shutdown_rx,
        )
    }))
}

async fn session(
    socket: WebSocket,
    subscription: Subscription,
    keepalive_interval: Duration,
    pong_grace: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let Subscription {
        guard,
        mut live,
        replay,
        filters,
        topic_list,
        poll,
    } = subscription;

    let (mut sender, mut receiver) = socket.split();
    let read_deadline = keepalive_interval + pong_grace;

    let writer = async {
        if send_frame(&mut sender, &Message::open(&topic_list)).await.is_err() {
            return;
        }
        for message in &replay {
            if filters.matches(message) && send_frame(&mut sender, message).await.is_err() {
                return;
            }
        }
        if poll {
            return;
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
                    guard.visitor.keepalive();
                    if sender.send(WsFrame::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    if send_frame(&mut sender, &Message::keepalive(&topic_list)).await.is_err() {
                        break;
                    }
                }
                message = live.next() => {
                    match message {
                        Some(message) if filters.matches(&message) => {
                            if send_frame(&mut sender, &message).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }
    };

    // Any inbound frame resets the deadline; axum answers Pings internally,
    // so a silent but live client still shows up here via Pongs.
    let reader = async {
        loop {
            match tokio::time::timeout(read_deadline, receiver.next()).await {
                Ok(Some(Ok(WsFrame::Close(_)))) | Ok(None) => break,
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    tracing::debug!(error = %e, "WebSocket read failed");
                    break;
                }
                Err(_) => {
                    tracing::debug!(
                        topics = %topic_list,
                        "WebSocket pong deadline missed, closing session"
                    );
                    break;
                }
            }
        }
    };

    // Either half ending cancels the other; the guard then unsubscribes
    tokio::select! {
        biased;
        _ = writer => {}
        _ = reader => {}
    }
    drop(guard);
}

async fn send_frame(
    sender: &mut (impl Sink<WsFrame, Error = axum::Error> + Unpin),
    message: &Message,
) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    sender
        .send(WsFrame::Text(json.into()))
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "WebSocket write failed");
        })
}
