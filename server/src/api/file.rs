//! Attachment download
//!
//! `GET /file/<msgid>[.ext]`. The blob is addressed by message id; the
//! extension is cosmetic and only informs the served content type. Downloads
//! consume the visitor's bandwidth budget all-or-nothing.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::Response;

use super::server::ServerState;
use super::types::ApiError;
use crate::domain::message::looks_like_message_id;
use crate::domain::visitor::Visitor;

pub async fn download(
    State(state): State<ServerState>,
    Path(filename): Path<String>,
    Extension(visitor): Extension<Arc<Visitor>>,
) -> Result<Response, ApiError> {
    let Some(files) = &state.files else {
        return Err(ApiError::attachment_not_found());
    };

    let id = filename.split('.').next().unwrap_or_default();
    if !looks_like_message_id(id) {
        return Err(ApiError::attachment_not_found());
    }

    let data = files.open(id).await?;
    visitor.bandwidth_allowed(data.len() as u64)?;

    let content_type = mime_guess::from_path(&filename)
        .first_raw()
        .unwrap_or("application/octet-stream");

    Response::builder()
        .header(CONTENT_TYPE, content_type)
        .header(CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .map_err(|_| ApiError::internal())
}
