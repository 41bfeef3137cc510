//! HTTP middleware: CORS, rate limiting, 404

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{Any, CorsLayer};

use super::server::ServerState;
use super::types::ApiError;
use crate::domain::visitor::client_ip;

/// Permissive CORS: every response carries `Access-Control-Allow-Origin: *`
/// and preflight requests are answered at the layer.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// JSON 404 for unknown routes
pub async fn handle_404() -> Response {
    ApiError::not_found().into_response()
}

/// Resolve the visitor for this connection, check the request token bucket
/// and hand the visitor to the handler via request extensions. A refused
/// check never reaches the handler, so no downstream budget is consumed.
pub async fn rate_limit_middleware(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let ip = client_ip(
        &addr.ip().to_string(),
        forwarded,
        state.config.behind_proxy,
    );

    let visitor = state.visitors.visitor(&ip);
    visitor.request_allowed()?;
    request.extensions_mut().insert(visitor);
    Ok(next.run(request).await)
}
