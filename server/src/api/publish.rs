//! Publish pipeline
//!
//! A publish request is authorized, rate-limited, parameter-parsed, body
//! classified (message text vs. attachment), then committed: live fan-out,
//! async mirroring to relay/mailer, cache insert. Scheduled messages skip
//! fan-out and mirroring; the at-sender loop picks them up when due.
//!
//! The cache insert deliberately happens after fan-out, so a replay from the
//! id of a message observed live may or may not include boundary messages;
//! clients deduplicate by message id.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_LENGTH;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{StreamExt, stream};

use super::auth::{Permission, authorize_topics};
use super::params::PublishParams;
use super::server::ServerState;
use super::types::ApiError;
use crate::core::constants::{BODY_LIMIT_SLACK, DEFAULT_MESSAGE_BODY};
use crate::data::files::ByteStream;
use crate::domain::message::{Attachment, Message, now_unix};
use crate::domain::topic::validate_topic_id;
use crate::domain::visitor::{Visitor, client_ip};

/// `PUT|POST /{topic}`
pub async fn publish(
    State(state): State<ServerState>,
    Path(topic): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Extension(visitor): Extension<Arc<Visitor>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Message>, ApiError> {
    handle(&state, &topic, &headers, &query, &visitor, Some(body)).await
}

/// Body shape of `PUT|POST /`
#[derive(Debug, serde::Deserialize)]
struct JsonPublish {
    topic: String,
    message: Option<String>,
    title: Option<String>,
    tags: Option<Vec<String>>,
    priority: Option<serde_json::Value>,
    click: Option<String>,
    actions: Option<serde_json::Value>,
    attach: Option<String>,
    filename: Option<String>,
    email: Option<String>,
    delay: Option<String>,
}

/// `PUT|POST /`: JSON publish normalisation. Fields are lifted into `X-*`
/// headers and the message text becomes the body, so the standard pipeline
/// runs unchanged. This route sits outside the shared rate-limit layer
/// (`GET /` is the unlimited landing page) and checks the visitor itself.
pub async fn publish_json(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Message>, ApiError> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let ip = client_ip(
        &addr.ip().to_string(),
        forwarded,
        state.config.behind_proxy,
    );
    let visitor = state.visitors.visitor(&ip);
    visitor.request_allowed()?;

    let limit = state.config.message_limit + BODY_LIMIT_SLACK;
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::entity_too_large())?;
    let publish: JsonPublish =
        serde_json::from_slice(&bytes).map_err(|_| ApiError::invalid_json_body())?;
    validate_topic_id(&publish.topic)?;

    let mut merged = headers.clone();
    let mut set_header = |name: &'static str, value: String| {
        match axum::http::HeaderValue::from_str(&value) {
            Ok(value) => {
                merged.insert(name, value);
            }
            Err(_) => tracing::debug!(header = name, "Dropping unrepresentable header value"),
        }
    };
    if let Some(title) = publish.title {
        set_header("x-title", title);
    }
    if let Some(tags) = publish.tags {
        set_header("x-tags", tags.join(","));
    }
    if let Some(priority) = publish.priority {
        let value = match priority {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        set_header("x-priority", value);
    }
    if let Some(click) = publish.click {
        set_header("x-click", click);
    }
    if let Some(actions) = publish.actions {
        set_header("x-actions", actions.to_string());
    }
    if let Some(attach) = publish.attach {
        set_header("x-attach", attach);
    }
    if let Some(filename) = publish.filename {
        set_header("x-filename", filename);
    }
    if let Some(email) = publish.email {
        set_header("x-email", email);
    }
    if let Some(delay) = publish.delay {
        set_header("x-delay", delay);
    }

    let body = Body::from(publish.message.unwrap_or_default());
    handle(&state, &publish.topic, &merged, &query, &visitor, Some(body)).await
}

/// `GET /{topic}/(publish|send|trigger)`: message text comes from parameters.
pub async fn publish_via_get(
    state: &ServerState,
    topic: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    visitor: &Arc<Visitor>,
) -> Result<Json<Message>, ApiError> {
    handle(state, topic, headers, query, visitor, None).await
}

async fn handle(
    state: &ServerState,
    topic: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    visitor: &Arc<Visitor>,
    body: Option<Body>,
) -> Result<Json<Message>, ApiError> {
    validate_topic_id(topic)?;
    authorize_topics(
        state.auther.as_ref(),
        headers,
        query,
        &[topic],
        Permission::Write,
    )
    .await?;

    let params = PublishParams::parse(headers, query, &state.config)?;
    let cache_enabled = state.config.cache_duration.is_some() && params.cache;

    if params.delay.is_some() {
        if !cache_enabled {
            return Err(ApiError::delay_without_cache());
        }
        if params.email.is_some() {
            return Err(ApiError::delay_with_email());
        }
    }
    if params.email.is_some() {
        if state.mailer.is_none() {
            return Err(ApiError::email_disabled());
        }
        visitor.email_allowed()?;
    }

    let mut message = Message::new(topic);
    if let Some(delay) = params.delay {
        message.time = delay;
    }
    if let Some(title) = &params.title {
        message.title = title.clone();
    }
    if let Some(click) = &params.click {
        message.click = click.clone();
    }
    if let Some(priority) = params.priority {
        message.priority = priority;
    }
    message.tags = params.tags.clone();
    message.actions = params.actions.clone();

    match body {
        Some(body) => {
            classify_body(state, headers, &params, visitor, &mut message, body).await?;
        }
        None => message.message = params.message.clone().unwrap_or_default(),
    }

    if message.message.is_empty() && message.attachment.is_none() {
        message.message = DEFAULT_MESSAGE_BODY.to_string();
    }

    commit(state, &params, visitor, &message).await?;
    Ok(Json(message))
}

/// Body interpretation: decide between message text and attachment bytes.
///
/// In order: UnifiedPush bodies are always the message (base64-encoded when
/// not UTF-8); an attach URL means the body is message text; an explicit
/// filename means the body is the attachment; small UTF-8 bodies are message
/// text; everything else falls back to an attachment.
async fn classify_body(
    state: &ServerState,
    headers: &HeaderMap,
    params: &PublishParams,
    visitor: &Arc<Visitor>,
    message: &mut Message,
    body: Body,
) -> Result<(), ApiError> {
    let limit = state.config.message_limit;
    let peeked = peek_body(body, limit).await?;
    let in_limit = peeked.complete && peeked.data.len() <= limit;

    // The first two rows take the whole body as the message regardless of
    // size; the peek cap only gates the text-vs-attachment fallback below
    if params.unifiedpush {
        match String::from_utf8(peeked.into_bytes().await?) {
            Ok(text) => message.message = text,
            Err(raw) => {
                message.message = BASE64.encode(raw.as_bytes());
                message.encoding = "base64".to_string();
            }
        }
        return Ok(());
    }

    if let Some(attach_url) = &params.attach_url {
        message.message = String::from_utf8(peeked.into_bytes().await?)
            .map_err(|_| ApiError::body_not_utf8())?;
        let name = params.filename.clone().unwrap_or_else(|| {
            attach_url
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("attachment")
                .to_string()
        });
        let content_type = mime_guess::from_path(&name).first_raw().unwrap_or("").to_string();
        // External attachments are pass-through: nothing is stored, so there
        // is no size, expiry or quota charge.
        message.attachment = Some(Attachment {
            name,
            content_type,
            size: 0,
            expires: 0,
            url: attach_url.clone(),
            owner: String::new(),
        });
        return Ok(());
    }

    let force_attachment = params.filename.is_some();
    if !force_attachment
        && in_limit
        && let Ok(text) = std::str::from_utf8(&peeked.data)
    {
        // An explicit message parameter wins over an empty body (GET-style
        // publishes routed through the JSON normalizer land here too)
        message.message = if text.is_empty() {
            params.message.clone().unwrap_or_default()
        } else {
            text.to_string()
        };
        return Ok(());
    }

    ingest_attachment(state, headers, params, visitor, message, peeked).await
}

/// Store the body as an attachment blob and attach its metadata.
async fn ingest_attachment(
    state: &ServerState,
    headers: &HeaderMap,
    params: &PublishParams,
    visitor: &Arc<Visitor>,
    message: &mut Message,
    peeked: PeekedBody,
) -> Result<(), ApiError> {
    let (Some(files), Some(base_url)) = (&state.files, &state.config.base_url) else {
        return Err(ApiError::attachments_disallowed());
    };
    // Attachment metadata lives in the message cache; without it the blob
    // would be orphaned immediately.
    if state.config.cache_duration.is_none() || !params.cache {
        return Err(ApiError::attachments_disallowed());
    }

    let mut limit = state.config.attachment_file_size_limit;
    if !visitor.is_exempt() {
        let used = state.cache.attachment_bytes(visitor.ip()).await?;
        let remaining = state
            .config
            .attachment_total_size_limit
            .saturating_sub(used);
        if remaining == 0 {
            return Err(ApiError::entity_too_large());
        }
        limit = limit.min(remaining);
    }

    if let Some(declared) = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        && declared > limit
    {
        return Err(ApiError::entity_too_large());
    }

    let text_like = std::str::from_utf8(&peeked.data).is_ok();
    let name = params.filename.clone().unwrap_or_else(|| {
        if text_like {
            "attachment.txt".to_string()
        } else {
            "attachment.bin".to_string()
        }
    });
    let content_type = mime_guess::from_path(&name)
        .first_raw()
        .unwrap_or(if text_like {
            "text/plain"
        } else {
            "application/octet-stream"
        })
        .to_string();
    let ext = std::path::Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    let size = files
        .write(&message.id, limit, peeked.into_stream())
        .await?;

    // The body went into the blob; the visible text falls back to the
    // message parameter or the file name
    if message.message.is_empty() {
        message.message = params.message.clone().unwrap_or_else(|| name.clone());
    }
    message.attachment = Some(Attachment {
        name,
        content_type,
        size,
        expires: now_unix() + state.config.attachment_expiry.as_secs(),
        url: format!("{base_url}/file/{}{ext}", message.id),
        owner: visitor.ip().to_string(),
    });
    Ok(())
}

/// Commit order: live fan-out, async mirrors, cache insert. Delayed messages
/// only hit the cache.
async fn commit(
    state: &ServerState,
    params: &PublishParams,
    visitor: &Arc<Visitor>,
    message: &Message,
) -> Result<(), ApiError> {
    let topic = state.topics.get_or_create(&message.topic)?;

    if !message.is_scheduled() {
        topic.publish(message);

        if params.relay && let Some(relay) = &state.relay {
            let relay = Arc::clone(relay);
            let mirrored = message.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.publish(&mirrored).await {
                    tracing::warn!(error = %e, topic = %mirrored.topic, "Relay mirror failed");
                }
            });
        }
        if let Some(to) = &params.email
            && let Some(mailer) = &state.mailer
        {
            let mailer = Arc::clone(mailer);
            let mailed = message.clone();
            let to = to.clone();
            let ip = visitor.ip().to_string();
            tokio::spawn(async move {
                if let Err(e) = mailer.send(&ip, &mailed, &to).await {
                    tracing::warn!(error = %e, "Email mirror failed");
                }
            });
        }
    }

    if params.cache && state.config.cache_duration.is_some() {
        state.cache.add_message(message).await?;
    }
    Ok(())
}

struct PeekedBody {
    data: Vec<u8>,
    complete: bool,
    rest: axum::body::BodyDataStream,
}

impl PeekedBody {
    /// Collect the peeked prefix and the unread remainder into one buffer.
    async fn into_bytes(mut self) -> Result<Vec<u8>, ApiError> {
        let mut data = self.data;
        while let Some(chunk) = self.rest.next().await {
            match chunk {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => {
                    tracing::debug!(error = %e, "Request body read failed");
                    return Err(ApiError::internal());
                }
            }
        }
        Ok(data)
    }

    /// Peeked prefix plus the unread remainder as one stream.
    fn into_stream(self) -> ByteStream<'static> {
        stream::iter(std::iter::once(Ok(self.data)))
            .chain(self.rest.map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| std::io::Error::other(e.to_string()))
            }))
            .boxed()
    }
}

/// Read up to `limit + 1` bytes so classification can tell "fits" from
/// "exceeds" without buffering an arbitrarily large body.
async fn peek_body(body: Body, limit: usize) -> Result<PeekedBody, ApiError> {
    let mut rest = body.into_data_stream();
    let mut data = Vec::new();
    let mut complete = true;

    while data.len() <= limit {
        match rest.next().await {
            Some(Ok(chunk)) => data.extend_from_slice(&chunk),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Request body read failed");
                return Err(ApiError::internal());
            }
            None => break,
        }
    }
    if data.len() > limit {
        complete = false;
    }

    Ok(PeekedBody {
        data,
        complete,
        rest,
    })
}
