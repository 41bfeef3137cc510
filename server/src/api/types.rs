//! Shared API types
//!
//! Error responses use the wire shape `{"code":N,"http":H,"error":"..."}`
//! with a matching HTTP status. Codes are stable within this server: the
//! first three digits are the HTTP status, the last two disambiguate.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::data::cache::CacheError;
use crate::data::files::FileCacheError;
use crate::domain::since::SinceError;
use crate::domain::topic::TopicError;
use crate::domain::visitor::VisitorError;

/// Standard API error response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: u32,
    pub http: StatusCode,
    pub error: String,
}

impl ApiError {
    fn new(code: u32, http: StatusCode, error: impl Into<String>) -> Self {
        Self {
            code,
            http,
            error: error.into(),
        }
    }

    pub fn invalid_topic(id: &str) -> Self {
        Self::new(
            40001,
            StatusCode::BAD_REQUEST,
            format!("invalid topic id: {id}"),
        )
    }

    pub fn reserved_topic(id: &str) -> Self {
        Self::new(
            40002,
            StatusCode::BAD_REQUEST,
            format!("topic id is reserved: {id}"),
        )
    }

    pub fn invalid_priority(value: &str) -> Self {
        Self::new(
            40003,
            StatusCode::BAD_REQUEST,
            format!("invalid priority: {value}"),
        )
    }

    pub fn invalid_since(value: &str) -> Self {
        Self::new(
            40004,
            StatusCode::BAD_REQUEST,
            format!("invalid since marker: {value}"),
        )
    }

    pub fn invalid_delay(reason: &str) -> Self {
        Self::new(
            40005,
            StatusCode::BAD_REQUEST,
            format!("invalid delay: {reason}"),
        )
    }

    pub fn invalid_json_body() -> Self {
        Self::new(40006, StatusCode::BAD_REQUEST, "invalid JSON body")
    }

    pub fn body_not_utf8() -> Self {
        Self::new(
            40007,
            StatusCode::BAD_REQUEST,
            "message body must be valid UTF-8",
        )
    }

    pub fn websocket_upgrade_required() -> Self {
        Self::new(
            40008,
            StatusCode::BAD_REQUEST,
            "WebSocket upgrade headers missing",
        )
    }

    pub fn attachments_disallowed() -> Self {
        Self::new(
            40009,
            StatusCode::BAD_REQUEST,
            "attachments are not allowed on this server",
        )
    }

    pub fn invalid_attach_url(url: &str) -> Self {
        Self::new(
            40010,
            StatusCode::BAD_REQUEST,
            format!("attach URL must start with http:// or https://: {url}"),
        )
    }

    pub fn delay_without_cache() -> Self {
        Self::new(
            40011,
            StatusCode::BAD_REQUEST,
            "delayed delivery requires caching",
        )
    }

    pub fn delay_with_email() -> Self {
        Self::new(
            40012,
            StatusCode::BAD_REQUEST,
            "delayed delivery cannot be combined with email",
        )
    }

    pub fn too_many_subscription_topics(limit: usize) -> Self {
        Self::new(
            40013,
            StatusCode::BAD_REQUEST,
            format!("too many topics in subscription, at most {limit} allowed"),
        )
    }

    pub fn email_disabled() -> Self {
        Self::new(
            40014,
            StatusCode::BAD_REQUEST,
            "email notifications are not enabled on this server",
        )
    }

    pub fn unauthorized() -> Self {
        Self::new(40101, StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(40301, StatusCode::FORBIDDEN, "forbidden")
    }

    pub fn not_found() -> Self {
        Self::new(40401, StatusCode::NOT_FOUND, "page not found")
    }

    pub fn attachment_not_found() -> Self {
        Self::new(40402, StatusCode::NOT_FOUND, "attachment not found")
    }

    pub fn entity_too_large() -> Self {
        Self::new(
            41301,
            StatusCode::PAYLOAD_TOO_LARGE,
            "attachment or message too large, or visitor quota exceeded",
        )
    }

    pub fn too_many_requests() -> Self {
        Self::new(
            42901,
            StatusCode::TOO_MANY_REQUESTS,
            "request limit reached, please slow down",
        )
    }

    pub fn too_many_emails() -> Self {
        Self::new(42902, StatusCode::TOO_MANY_REQUESTS, "email limit reached")
    }

    pub fn too_many_subscriptions() -> Self {
        Self::new(
            42903,
            StatusCode::TOO_MANY_REQUESTS,
            "subscription limit reached",
        )
    }

    pub fn bandwidth_limit_reached() -> Self {
        Self::new(
            42904,
            StatusCode::TOO_MANY_REQUESTS,
            "attachment bandwidth limit reached",
        )
    }

    pub fn too_many_topics() -> Self {
        Self::new(42905, StatusCode::TOO_MANY_REQUESTS, "topic limit reached")
    }

    pub fn internal() -> Self {
        Self::new(
            50001,
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.http,
            Json(serde_json::json!({
                "code": self.code,
                "http": self.http.as_u16(),
                "error": self.error,
            })),
        )
            .into_response()
    }
}

impl From<TopicError> for ApiError {
    fn from(e: TopicError) -> Self {
        match e {
            TopicError::InvalidId(id) => Self::invalid_topic(&id),
            TopicError::ReservedId(id) => Self::reserved_topic(&id),
            TopicError::LimitReached(_) => Self::too_many_topics(),
        }
    }
}

impl From<VisitorError> for ApiError {
    fn from(e: VisitorError) -> Self {
        match e {
            VisitorError::RequestLimit => Self::too_many_requests(),
            VisitorError::EmailLimit => Self::too_many_emails(),
            VisitorError::SubscriptionLimit => Self::too_many_subscriptions(),
            VisitorError::BandwidthLimit => Self::bandwidth_limit_reached(),
            VisitorError::AttachmentQuota => Self::entity_too_large(),
        }
    }
}

impl From<SinceError> for ApiError {
    fn from(e: SinceError) -> Self {
        Self::invalid_since(&e.0)
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        tracing::error!(error = %e, "Message cache error");
        Self::internal()
    }
}

impl From<FileCacheError> for ApiError {
    fn from(e: FileCacheError) -> Self {
        match e {
            FileCacheError::NotFound(_) | FileCacheError::InvalidId(_) => {
                Self::attachment_not_found()
            }
            FileCacheError::ExceedsLimit(_) => Self::entity_too_large(),
            FileCacheError::Io(e) => {
                tracing::error!(error = %e, "File cache error");
                Self::internal()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let response = ApiError::invalid_topic("bad topic").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_codes_embed_http_status() {
        for err in [
            ApiError::invalid_topic("x"),
            ApiError::unauthorized(),
            ApiError::forbidden(),
            ApiError::not_found(),
            ApiError::entity_too_large(),
            ApiError::too_many_requests(),
            ApiError::internal(),
        ] {
            assert_eq!(err.code / 100, u32::from(err.http.as_u16()));
        }
    }

    #[test]
    fn test_visitor_error_mapping() {
        assert_eq!(
            ApiError::from(VisitorError::RequestLimit).http,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(VisitorError::AttachmentQuota).http,
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_topic_error_mapping() {
        let err: ApiError = TopicError::ReservedId("docs".to_string()).into();
        assert_eq!(err.code, 40002);
    }
}
