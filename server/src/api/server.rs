//! API server: route table and listener
//!
//! The surface is registered in fixed order; the dynamic topic routes
//! dispatch on the trailing verb segment and validate topic ids before doing
//! any work, so unknown shapes fall through to the JSON 404.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{DefaultBodyLimit, Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::types::ApiError;
use super::{file, middleware, publish, site, subscribe, ws};
use crate::api::auth::Auther;
use crate::core::config::Config;
use crate::core::constants::BODY_LIMIT_SLACK;
use crate::core::shutdown::ShutdownService;
use crate::data::cache::MessageCache;
use crate::data::files::FileCache;
use crate::data::relay::{Mailer, PushRelay};
use crate::domain::topic::TopicRegistry;
use crate::domain::visitor::{Visitor, VisitorManager};

/// Shared handler state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub topics: Arc<TopicRegistry>,
    pub visitors: Arc<VisitorManager>,
    pub cache: Arc<dyn MessageCache>,
    pub files: Option<Arc<dyn FileCache>>,
    pub auther: Arc<dyn Auther>,
    pub relay: Option<Arc<dyn PushRelay>>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Build the full route table.
pub fn router(state: ServerState) -> Router {
    let body_limit =
        state.config.attachment_file_size_limit as usize + BODY_LIMIT_SLACK;

    let limited = Router::new()
        .route("/user/stats", get(site::user_stats))
        .route("/file/{filename}", get(file::download))
        .route(
            "/{topic}",
            get(topic_page)
                .put(publish::publish)
                .post(publish::publish),
        )
        .route("/{topic}/{verb}", get(topic_verb))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    Router::new()
        .route(
            "/",
            get(site::landing)
                .put(publish::publish_json)
                .post(publish::publish_json),
        )
        .route("/config.js", get(site::config_js))
        .merge(limited)
        .fallback(middleware::handle_404)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// `GET /{topic}`: web page redirect or UnifiedPush discovery. Invalid and
/// reserved ids read as unknown pages.
async fn topic_page(
    State(state): State<ServerState>,
    Path(topic): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    crate::domain::topic::validate_topic_id(&topic).map_err(|_| ApiError::not_found())?;
    site::topic_page(&state, &topic, &query).await
}

/// `GET /{topic}/{verb}` dispatch: subscribe variants, query publishes and
/// the auth check share this shape.
async fn topic_verb(
    State(state): State<ServerState>,
    Path((topic, verb)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    Extension(visitor): Extension<Arc<Visitor>>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    match verb.as_str() {
        "json" => {
            subscribe::stream(
                &state,
                &topic,
                subscribe::StreamKind::Json,
                &headers,
                &query,
                &visitor,
            )
            .await
        }
        "sse" => {
            subscribe::stream(
                &state,
                &topic,
                subscribe::StreamKind::Sse,
                &headers,
                &query,
                &visitor,
            )
            .await
        }
        "raw" => {
            subscribe::stream(
                &state,
                &topic,
                subscribe::StreamKind::Raw,
                &headers,
                &query,
                &visitor,
            )
            .await
        }
        "ws" => {
            let upgrade = upgrade.map_err(|_| ApiError::websocket_upgrade_required())?;
            ws::stream_ws(&state, &topic, &headers, &query, &visitor, upgrade).await
        }
        "publish" | "send" | "trigger" => publish::publish_via_get(
            &state, &topic, &headers, &query, &visitor,
        )
        .await
        .map(IntoResponse::into_response),
        "auth" => site::topic_auth(&state, &topic, &headers, &query).await,
        _ => Err(ApiError::not_found()),
    }
}

/// Binds the listener and serves until shutdown.
pub struct ApiServer {
    state: ServerState,
    shutdown: ShutdownService,
}

impl ApiServer {
    pub fn new(state: ServerState, shutdown: ShutdownService) -> Self {
        Self { state, shutdown }
    }

    pub async fn start(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.state.config.host.parse()?,
            self.state.config.port,
        );
        let shutdown = self.shutdown.clone();
        let router = router(self.state);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Listening");
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;

        Ok(())
    }
}
