//! Read-only serving of uploaded files under the uploads prefix.

use std::path::PathBuf;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{uri::PathAndQuery, Method, Request, Uri},
    response::IntoResponse,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::config::UploadsConfig;
use crate::error::PipelineError;
use crate::pipeline::{Next, Stage, StageResult};

/// Characters percent-encoded inside one path segment.
pub const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Public URL of a stored upload named `file_name`.
pub fn public_url(prefix: &str, file_name: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        utf8_percent_encode(file_name, PATH_SEGMENT)
    )
}

/// Stage 3: short-circuits `GET`/`HEAD` under `url_prefix`.
pub struct StaticUploads {
    prefix: String,
    directory: PathBuf,
}

impl StaticUploads {
    pub fn new(config: &UploadsConfig) -> Self {
        Self {
            prefix: config.url_prefix.trim_end_matches('/').to_string(),
            directory: PathBuf::from(&config.directory),
        }
    }

    /// Path relative to the upload directory, if `path` is under the prefix.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(&self.prefix)?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

#[async_trait]
impl Stage for StaticUploads {
    fn name(&self) -> &'static str {
        "static_uploads"
    }

    async fn handle(&self, mut request: Request<Body>, next: Next) -> StageResult {
        let serves = request.method() == Method::GET || request.method() == Method::HEAD;
        let Some(rest) = self.strip(request.uri().path()).filter(|_| serves) else {
            return Ok(next.run(request).await);
        };

        let rest = if rest.is_empty() { "/" } else { rest };
        let mut parts = request.uri().clone().into_parts();
        parts.path_and_query = Some(
            PathAndQuery::try_from(rest)
                .map_err(|e| PipelineError::Internal(format!("static path: {e}")))?,
        );
        *request.uri_mut() =
            Uri::from_parts(parts).map_err(|e| PipelineError::Internal(format!("static uri: {e}")))?;

        let response = match ServeDir::new(&self.directory).oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        Ok(response.map(Body::new).into_response())
    }
}
