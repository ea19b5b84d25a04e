//! Request body parsing.
//!
//! # Responsibilities
//! - JSON bodies: buffer up to `json_limit_bytes`, parse once, attach
//!   [`ParsedBody`] and restore the raw bytes for handlers
//! - `multipart/form-data`: stream files to temporary files, collect text
//!   fields, attach [`Uploads`]
//! - Every other content type passes through untouched
//!
//! # Design Decisions
//! - Temporary files are removed when the last [`UploadedFile`] handle is
//!   dropped, i.e. when the request completes, unless a handler persists them
//! - Size limits are enforced while streaming, never after buffering

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, Request},
};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::BodyConfig;
use crate::error::PipelineError;
use crate::pipeline::{Next, Stage, StageResult};

/// A parsed JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody(pub Value);

/// One file received in a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: u64,
    temp: Arc<NamedTempFile>,
}

impl UploadedFile {
    /// Where the file currently lives.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Copy the file to `dir/<uuid>-<file name>`, creating `dir` if needed.
    /// Returns the destination path.
    pub async fn persist(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let name = format!("{}-{}", Uuid::new_v4().simple(), safe_file_name(&self.file_name));
        let dest = dir.join(name);
        tokio::fs::copy(self.temp.path(), &dest).await?;
        Ok(dest)
    }
}

/// Strip any directory components a client put in the file name.
pub fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "" | "." | ".." => "upload".to_string(),
        other => other.to_string(),
    }
}

/// Fields and files of a multipart request.
#[derive(Debug, Clone, Default)]
pub struct Uploads {
    pub fields: Map<String, Value>,
    pub files: Vec<UploadedFile>,
}

impl<S: Send + Sync> FromRequestParts<S> for Uploads {
    type Rejection = PipelineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Uploads>()
            .cloned()
            .ok_or_else(|| PipelineError::MalformedBody("expected multipart/form-data".into()))
    }
}

enum BodyKind {
    Json,
    Multipart(String),
    Other,
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return BodyKind::Other;
    };

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence == "application/json" || essence.ends_with("+json") {
        BodyKind::Json
    } else if essence == "multipart/form-data" {
        match multer::parse_boundary(content_type) {
            Ok(boundary) => BodyKind::Multipart(boundary),
            Err(_) => BodyKind::Other,
        }
    } else {
        BodyKind::Other
    }
}

/// Stage 2: parse JSON and multipart bodies.
pub struct BodyParser {
    json_limit: usize,
    upload_limit: usize,
    max_files: usize,
    temp_dir: Option<PathBuf>,
}

impl BodyParser {
    pub fn new(config: &BodyConfig) -> Self {
        Self {
            json_limit: config.json_limit_bytes,
            upload_limit: config.upload_limit_bytes,
            max_files: config.max_files,
            temp_dir: config.temp_dir.as_ref().map(PathBuf::from),
        }
    }

    async fn read_json(&self, body: Body) -> Result<Bytes, PipelineError> {
        let mut stream = body.into_data_stream();
        let mut buffer = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PipelineError::MalformedBody(e.to_string()))?;
            if buffer.len() + chunk.len() > self.json_limit {
                return Err(PipelineError::PayloadTooLarge {
                    limit: self.json_limit,
                });
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(buffer))
    }

    async fn read_multipart(&self, body: Body, boundary: String) -> Result<Uploads, PipelineError> {
        let limit = self.upload_limit;
        let constraints = multer::Constraints::new()
            .size_limit(multer::SizeLimit::new().whole_stream(limit as u64));
        let mut multipart =
            multer::Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

        let mut uploads = Uploads::default();
        while let Some(mut field) = multipart.next_field().await.map_err(multipart_error(limit))? {
            let name = field.name().unwrap_or_default().to_string();

            let Some(file_name) = field.file_name().map(str::to_string) else {
                let text = field.text().await.map_err(multipart_error(limit))?;
                uploads.fields.insert(name, Value::String(text));
                continue;
            };

            if uploads.files.len() >= self.max_files {
                return Err(PipelineError::TooManyFiles(self.max_files));
            }

            let content_type = field.content_type().map(|m| m.to_string());
            let temp_dir = self.temp_dir.clone();
            let temp = tokio::task::spawn_blocking(move || match temp_dir {
                Some(dir) => NamedTempFile::new_in(dir),
                None => NamedTempFile::new(),
            })
            .await
            .map_err(|e| PipelineError::Internal(format!("temp file task: {e}")))??;

            let mut file = tokio::fs::File::from_std(temp.reopen()?);
            let mut size = 0u64;
            while let Some(chunk) = field.chunk().await.map_err(multipart_error(limit))? {
                size += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;

            tracing::debug!(field = %name, file = %file_name, size, "Staged upload");
            uploads.files.push(UploadedFile {
                field: name,
                file_name,
                content_type,
                size,
                temp: Arc::new(temp),
            });
        }

        Ok(uploads)
    }
}

fn multipart_error(limit: usize) -> impl Fn(multer::Error) -> PipelineError {
    move |e| match e {
        multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => {
            PipelineError::PayloadTooLarge { limit }
        }
        other => PipelineError::MalformedBody(other.to_string()),
    }
}

#[async_trait]
impl Stage for BodyParser {
    fn name(&self) -> &'static str {
        "body_parser"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> StageResult {
        match body_kind(request.headers()) {
            BodyKind::Other => Ok(next.run(request).await),
            BodyKind::Json => {
                let (mut parts, body) = request.into_parts();
                let bytes = self.read_json(body).await?;
                if !bytes.is_empty() {
                    let value: Value = serde_json::from_slice(&bytes)
                        .map_err(|e| PipelineError::MalformedBody(e.to_string()))?;
                    parts.extensions.insert(ParsedBody(value));
                }
                Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
            }
            BodyKind::Multipart(boundary) => {
                let (mut parts, body) = request.into_parts();
                let uploads = self.read_multipart(body, boundary).await?;
                parts.headers.remove(header::CONTENT_LENGTH);
                parts.extensions.insert(uploads);
                Ok(next.run(Request::from_parts(parts, Body::empty())).await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn parser() -> BodyParser {
        BodyParser::new(&BodyConfig {
            json_limit_bytes: 64,
            upload_limit_bytes: 1024,
            max_files: 2,
            temp_dir: None,
        })
    }

    fn multipart_body(boundary: &str, parts: &[(&str, Option<&str>, &str)]) -> Body {
        let mut out = String::new();
        for (name, file, content) in parts {
            out.push_str(&format!("--{boundary}\r\n"));
            match file {
                Some(file) => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file}\"\r\nContent-Type: text/plain\r\n\r\n"
                )),
                None => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            out.push_str(content);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{boundary}--\r\n"));
        Body::from(out)
    }

    #[test]
    fn test_body_kind() {
        let mut headers = HeaderMap::new();
        assert!(matches!(body_kind(&headers), BodyKind::Other));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        assert!(matches!(body_kind(&headers), BodyKind::Json));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/vnd.api+json"));
        assert!(matches!(body_kind(&headers), BodyKind::Json));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=XyZ"));
        assert!(matches!(body_kind(&headers), BodyKind::Multipart(b) if b == "XyZ"));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(matches!(body_kind(&headers), BodyKind::Other));
    }

    #[tokio::test]
    async fn test_json_limit() {
        let parser = parser();
        let ok = parser.read_json(Body::from(r#"{"a":1}"#)).await.unwrap();
        assert_eq!(&ok[..], br#"{"a":1}"#);

        let big = format!(r#"{{"a":"{}"}}"#, "x".repeat(100));
        let err = parser.read_json(Body::from(big)).await.unwrap_err();
        assert!(matches!(err, PipelineError::PayloadTooLarge { limit: 64 }));
    }

    #[tokio::test]
    async fn test_multipart_fields_and_files() {
        let parser = parser();
        let body = multipart_body(
            "B0UND",
            &[("title", None, "hello"), ("avatar", Some("me.txt"), "file-bytes")],
        );
        let uploads = parser.read_multipart(body, "B0UND".into()).await.unwrap();

        assert_eq!(uploads.fields["title"], "hello");
        assert_eq!(uploads.files.len(), 1);
        let file = &uploads.files[0];
        assert_eq!(file.field, "avatar");
        assert_eq!(file.file_name, "me.txt");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(file.size, 10);
        assert_eq!(std::fs::read_to_string(file.temp_path()).unwrap(), "file-bytes");
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let parser = parser();
        let body = multipart_body("B", &[("f", Some("a.txt"), "abc")]);
        let uploads = parser.read_multipart(body, "B".into()).await.unwrap();
        let path = uploads.files[0].temp_path().to_path_buf();
        assert!(path.exists());
        drop(uploads);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_too_many_files() {
        let parser = parser();
        let body = multipart_body(
            "B",
            &[("a", Some("1.txt"), "1"), ("b", Some("2.txt"), "2"), ("c", Some("3.txt"), "3")],
        );
        let err = parser.read_multipart(body, "B".into()).await.unwrap_err();
        assert!(matches!(err, PipelineError::TooManyFiles(2)));
    }

    #[tokio::test]
    async fn test_upload_limit() {
        let parser = parser();
        let big = "x".repeat(4096);
        let body = multipart_body("B", &[("a", Some("big.bin"), &big)]);
        let err = parser.read_multipart(body, "B".into()).await.unwrap_err();
        assert!(matches!(err, PipelineError::PayloadTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn test_persist() {
        let parser = parser();
        let body = multipart_body("B", &[("a", Some("../../etc/notes.txt"), "kept")]);
        let uploads = parser.read_multipart(body, "B".into()).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/dir");
        let dest = uploads.files[0].persist(&target).await.unwrap();
        assert_eq!(dest.parent(), Some(target.as_path()));
        let name = dest.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("-notes.txt"), "{name}");
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "kept");
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("photo.png"), "photo.png");
        assert_eq!(safe_file_name("..\\..\\win.ini"), "win.ini");
        assert_eq!(safe_file_name("dir/"), "upload");
        assert_eq!(safe_file_name(".."), "upload");
    }
}
