//! Centralized error translation.
//!
//! Every stage reports failures as a [`PipelineError`]; the pipeline turns
//! them into responses here and nowhere else. Policy rejections keep their
//! own status and message. Anything unexpected is logged in full and
//! surfaced to the client as a generic failure.

use std::any::Any;

use axum::{
    body::Body,
    http::{header, HeaderValue, Response as HttpResponse, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tower::{timeout::error::Elapsed, BoxError};

use crate::observability::metrics;
use crate::store::StoreError;

/// Generic body for failures whose detail must stay server-side.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Failures raised by pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Origin not in the allow-list.
    #[error("origin `{0}` not allowed by CORS policy")]
    OriginRejected(String),

    /// Client exceeded its request ceiling.
    #[error("rate limit exceeded for {client}")]
    RateLimited {
        client: String,
        message: String,
        retry_after_secs: u64,
        limit: u64,
    },

    /// Body larger than the configured limit.
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Body could not be parsed for its declared content type.
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    /// Too many files in one multipart request.
    #[error("too many files (max {0})")]
    TooManyFiles(usize),

    /// Session or counter store could not be reached.
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    /// Request took longer than the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Local I/O failure (upload staging, static files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short machine-readable reason, used for metrics and the `error` field.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::OriginRejected(_) => "cors_rejected",
            PipelineError::RateLimited { .. } => "rate_limited",
            PipelineError::PayloadTooLarge { .. } => "payload_too_large",
            PipelineError::MalformedBody(_) => "malformed_body",
            PipelineError::TooManyFiles(_) => "too_many_files",
            PipelineError::Store(_) => "store_unavailable",
            PipelineError::Timeout => "timeout",
            PipelineError::Io(_) | PipelineError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        metrics::record_rejection(self.reason());

        match self {
            PipelineError::OriginRejected(origin) => {
                tracing::warn!(origin = %origin, "Origin rejected");
                json_error(StatusCode::FORBIDDEN, "Not allowed by CORS", "cors_rejected")
            }
            PipelineError::RateLimited {
                client,
                message,
                retry_after_secs,
                limit,
            } => {
                tracing::warn!(client = %client, "Rate limit exceeded");
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "message": message }))).into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                headers.insert("ratelimit-limit", HeaderValue::from(limit));
                headers.insert("ratelimit-remaining", HeaderValue::from(0u64));
                headers.insert("ratelimit-reset", HeaderValue::from(retry_after_secs));
                response
            }
            PipelineError::PayloadTooLarge { limit } => json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                &format!("Payload exceeds {limit} bytes"),
                "payload_too_large",
            ),
            PipelineError::MalformedBody(detail) => {
                tracing::debug!(detail = %detail, "Malformed body");
                json_error(StatusCode::BAD_REQUEST, "Malformed request body", "malformed_body")
            }
            PipelineError::TooManyFiles(max) => json_error(
                StatusCode::BAD_REQUEST,
                &format!("Too many files (max {max})"),
                "too_many_files",
            ),
            PipelineError::Store(e) => {
                tracing::error!(error = %e, "Store unavailable");
                json_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable",
                    "store_unavailable",
                )
            }
            PipelineError::Timeout => {
                tracing::warn!("Request timed out");
                json_error(StatusCode::REQUEST_TIMEOUT, "Request timed out", "timeout")
            }
            PipelineError::Io(e) => internal(&e),
            PipelineError::Internal(e) => internal(&e),
        }
    }
}

fn internal(detail: &dyn std::fmt::Display) -> Response {
    tracing::error!(error = %detail, "Unhandled pipeline failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": INTERNAL_ERROR_MESSAGE })),
    )
        .into_response()
}

fn json_error(status: StatusCode, message: &str, reason: &str) -> Response {
    (status, Json(json!({ "message": message, "error": reason }))).into_response()
}

/// Error handler for the request timeout layer.
pub async fn translate_timeout(err: BoxError) -> PipelineError {
    if err.is::<Elapsed>() {
        PipelineError::Timeout
    } else {
        PipelineError::Internal(err.to_string())
    }
}

/// Panic handler for `CatchPanicLayer`: the uniform failure response.
pub fn translate_panic(err: Box<dyn Any + Send + 'static>) -> HttpResponse<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    metrics::record_rejection("panic");
    internal(&format!("handler panicked: {detail}"))
}
