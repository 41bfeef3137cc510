//! Small site endpoints: landing, topic page, auth check, visitor stats,
//! web app configuration

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;

use super::auth::{Permission, authorize_topics};
use super::server::ServerState;
use super::types::ApiError;
use crate::core::config::WebRoot;
use crate::core::constants::{APP_NAME, DISALLOWED_TOPICS};
use crate::domain::visitor::Visitor;

/// `GET /`
pub async fn landing(State(state): State<ServerState>) -> Result<Response, ApiError> {
    match state.config.web_root {
        WebRoot::App => Ok(Redirect::temporary("/app/").into_response()),
        WebRoot::Home => Ok(format!(
            "{APP_NAME} is a simple HTTP pub/sub notification service.\n\
             Publish:   curl -d \"hi\" {base}/mytopic\n\
             Subscribe: curl -s {base}/mytopic/json\n",
            base = state
                .config
                .base_url
                .as_deref()
                .unwrap_or("http://localhost")
        )
        .into_response()),
        WebRoot::Disabled => Err(ApiError::not_found()),
    }
}

/// `GET /{topic}`: web UI redirect, or UnifiedPush discovery with `?up=1`
pub async fn topic_page(
    state: &ServerState,
    topic: &str,
    query: &HashMap<String, String>,
) -> Result<Response, ApiError> {
    if query.get("up").map(String::as_str) == Some("1") {
        return Ok(Json(serde_json::json!({"unifiedpush": {"version": 1}})).into_response());
    }
    match state.config.web_root {
        WebRoot::Disabled => Err(ApiError::not_found()),
        _ => Ok(Redirect::temporary(&format!("/app/#{topic}")).into_response()),
    }
}

/// `GET /{topic}/auth`: succeeds when the caller may read the topic
pub async fn topic_auth(
    state: &ServerState,
    topic: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<Response, ApiError> {
    authorize_topics(
        state.auther.as_ref(),
        headers,
        query,
        &[topic],
        Permission::Read,
    )
    .await?;
    Ok(Json(serde_json::json!({"success": true})).into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VisitorStats {
    subscriptions: u64,
    subscription_limit: u64,
    visitor_attachment_bytes_used: u64,
    visitor_attachment_bytes_remaining: u64,
    visitor_attachment_bytes_total: u64,
}

/// `GET /user/stats`
pub async fn user_stats(
    State(state): State<ServerState>,
    Extension(visitor): Extension<Arc<Visitor>>,
) -> Result<Json<impl Serialize>, ApiError> {
    let used = state.cache.attachment_bytes(visitor.ip()).await?;
    let total = state.config.attachment_total_size_limit;
    Ok(Json(VisitorStats {
        subscriptions: visitor.subscriptions(),
        subscription_limit: state.config.visitor_subscription_limit,
        visitor_attachment_bytes_used: used,
        visitor_attachment_bytes_remaining: total.saturating_sub(used),
        visitor_attachment_bytes_total: total,
    }))
}

/// `GET /config.js`: configuration consumed by the web app
pub async fn config_js(State(_state): State<ServerState>) -> Response {
    let config = serde_json::json!({
        "appRoot": "/app/",
        "disallowedTopics": DISALLOWED_TOPICS,
    });
    let body = format!("var config = {config};\n");
    ([(CONTENT_TYPE, "text/javascript")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_wire_names_are_camel_case() {
        let stats = VisitorStats {
            subscriptions: 2,
            subscription_limit: 30,
            visitor_attachment_bytes_used: 10,
            visitor_attachment_bytes_remaining: 90,
            visitor_attachment_bytes_total: 100,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["visitorAttachmentBytesRemaining"], 90);
        assert_eq!(json["subscriptionLimit"], 30);
    }

    #[test]
    fn test_query_needs_up_equals_one() {
        // `?up=2` must not trigger the UnifiedPush discovery answer
        let query = HashMap::from([("up".to_string(), "2".to_string())]);
        assert_ne!(query.get("up").map(String::as_str), Some("1"));
    }
}
