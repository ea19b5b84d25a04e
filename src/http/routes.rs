//! Application routes dispatched after the pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};

use crate::config::GatewayConfig;
use crate::error::PipelineError;
use crate::http::body::Uploads;
use crate::http::static_files::public_url;
use crate::session::Session;

pub const LIVENESS_MESSAGE: &str = "API is running 🚀";

#[derive(Clone)]
struct RouteState {
    upload_dir: Arc<PathBuf>,
    upload_prefix: Arc<str>,
}

/// Routes served behind the pipeline.
pub fn router(config: &GatewayConfig) -> Router {
    let state = RouteState {
        upload_dir: Arc::new(PathBuf::from(&config.uploads.directory)),
        upload_prefix: Arc::from(config.uploads.url_prefix.trim_end_matches('/')),
    };

    Router::new()
        .route("/", get(liveness))
        .route(
            "/api/session",
            get(show_session).post(write_session).delete(destroy_session),
        )
        .route("/api/uploads", post(store_uploads))
        .fallback(not_found)
        .with_state(state)
}

async fn liveness() -> &'static str {
    LIVENESS_MESSAGE
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Not found" })))
}

async fn show_session(session: Session) -> Json<Value> {
    Json(json!({
        "id": session.id(),
        "new": session.is_new(),
        "data": session.data(),
    }))
}

/// Store the posted fields under a new session id.
async fn write_session(
    session: Session,
    Json(fields): Json<Map<String, Value>>,
) -> Result<Json<Value>, PipelineError> {
    session.regenerate();
    for (key, value) in fields {
        session
            .insert(&key, value)
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
    }
    Ok(Json(json!({ "data": session.data() })))
}

async fn destroy_session(session: Session) -> StatusCode {
    session.destroy();
    StatusCode::NO_CONTENT
}

async fn store_uploads(
    State(state): State<RouteState>,
    uploads: Uploads,
) -> Result<impl IntoResponse, PipelineError> {
    if uploads.files.is_empty() {
        return Err(PipelineError::MalformedBody("no files in upload".into()));
    }

    let mut stored = Vec::with_capacity(uploads.files.len());
    for file in &uploads.files {
        let dest = file.persist(&state.upload_dir).await?;
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(file = %name, size = file.size, "Stored upload");
        stored.push(json!({
            "field": file.field,
            "name": name,
            "contentType": file.content_type,
            "size": file.size,
            "url": public_url(&state.upload_prefix, &name),
        }));
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "files": stored, "fields": uploads.fields })),
    ))
}
