//! Script-injection sanitization for request input.
//!
//! Every string reachable from the query string, the decoded route path, a
//! parsed JSON body, or multipart text fields is cleaned before dispatch.
//! Keys, numbers, booleans and nesting are left as they are.
//!
//! Cleaning removes, repeatedly until nothing changes:
//! - `<script>…</script>` blocks, content included
//! - complete HTML tags (and with them any attributes)
//! - inline event-handler assignments (`on<name>=` after a non-word
//!   character), sparing a few ordinary words such as `online`
//! - `javascript:` / `vbscript:` / `data:text/html` schemes
//!
//! and finally HTML-escapes any `<` or `>` left over.

use std::borrow::Cow;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, uri::PathAndQuery, HeaderValue, Request, Uri},
};
use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use regex::{Captures, Regex};
use serde_json::Value;
use url::form_urlencoded;

use crate::error::PipelineError;
use crate::http::body::{ParsedBody, Uploads};
use crate::http::static_files::PATH_SEGMENT;
use crate::pipeline::{Next, Stage, StageResult};

static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<\s*script\b[^>]*>.*?<\s*/\s*script\s*>").expect("Invalid script regex")
});

static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[a-zA-Z!?][^<>]*>").expect("Invalid tag regex"));

static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?P<lead>^|[^a-z0-9_])(?P<name>on[a-z]+)\s*=")
        .expect("Invalid event handler regex")
});

/// Ordinary words the handler pattern would otherwise eat.
const PLAIN_ON_WORDS: [&str; 12] = [
    "once", "one", "ones", "ongoing", "onion", "online", "only", "onset", "onto", "onus",
    "onward", "onwards",
];

static SCRIPT_SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:j\s*a\s*v\s*a|v\s*b)\s*s\s*c\s*r\s*i\s*p\s*t\s*:|d\s*a\s*t\s*a\s*:\s*text/html",
    )
    .expect("Invalid scheme regex")
});

fn strip_once(input: &str) -> String {
    let s = SCRIPT_BLOCK.replace_all(input, "");
    let s = TAG.replace_all(&s, "");
    let s = strip_handlers(&s);
    let s = SCRIPT_SCHEME.replace_all(&s, "");
    s.into_owned()
}

fn strip_handlers(input: &str) -> Cow<'_, str> {
    EVENT_HANDLER.replace_all(input, |caps: &Captures| {
        let name = caps["name"].to_ascii_lowercase();
        if PLAIN_ON_WORDS.contains(&name.as_str()) {
            caps[0].to_string()
        } else {
            caps["lead"].to_string()
        }
    })
}

/// Clean one string. Borrows when nothing needed changing.
pub fn sanitize_str(input: &str) -> Cow<'_, str> {
    if !input.contains(['<', '>', ':', '=']) {
        return Cow::Borrowed(input);
    }

    // Every pass only deletes, so this terminates.
    let mut current = input.to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    let escaped = current.replace('<', "&lt;").replace('>', "&gt;");

    if escaped == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(escaped)
    }
}

fn sanitize_in_place(value: &mut String) -> bool {
    let clean = match sanitize_str(value) {
        Cow::Owned(clean) => clean,
        Cow::Borrowed(_) => return false,
    };
    *value = clean;
    true
}

/// Clean every string inside `value`. Returns whether anything changed.
pub fn sanitize_json(value: &mut Value) -> bool {
    match value {
        Value::String(s) => sanitize_in_place(s),
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, v| sanitize_json(v) | changed),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |changed, v| sanitize_json(v) | changed),
        _ => false,
    }
}

/// Clean the values of a query string. `None` when unchanged.
pub fn sanitize_query(query: &str) -> Option<String> {
    let mut changed = false;
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| {
            let clean = sanitize_str(&v);
            changed |= matches!(clean, Cow::Owned(_));
            (k.into_owned(), clean.into_owned())
        })
        .collect();

    changed.then(|| form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish())
}

/// Clean each decoded segment of a path. `None` when unchanged.
pub fn sanitize_path(path: &str) -> Option<String> {
    let mut changed = false;
    let segments: Vec<String> = path
        .split('/')
        .map(|raw| {
            let decoded = percent_decode_str(raw).decode_utf8_lossy();
            match sanitize_str(&decoded) {
                Cow::Owned(clean) => {
                    changed = true;
                    utf8_percent_encode(&clean, PATH_SEGMENT).to_string()
                }
                Cow::Borrowed(_) => raw.to_string(),
            }
        })
        .collect();

    changed.then(|| segments.join("/"))
}

fn rewrite_uri(uri: &Uri) -> Result<Option<Uri>, PipelineError> {
    let path = sanitize_path(uri.path());
    let query = uri.query().and_then(sanitize_query);
    if path.is_none() && query.is_none() {
        return Ok(None);
    }

    let path = path.unwrap_or_else(|| uri.path().to_string());
    let path_and_query = match query.as_deref().or(uri.query()) {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path,
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|e| PipelineError::Internal(format!("sanitized uri: {e}")))?,
    );
    Uri::from_parts(parts)
        .map(Some)
        .map_err(|e| PipelineError::Internal(format!("sanitized uri: {e}")))
}

/// Stage 6: rewrite request input in place.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer;

impl Sanitizer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for Sanitizer {
    fn name(&self) -> &'static str {
        "sanitizer"
    }

    async fn handle(&self, mut request: Request<Body>, next: Next) -> StageResult {
        if let Some(uri) = rewrite_uri(request.uri())? {
            tracing::debug!(original = %request.uri(), "Sanitized request uri");
            *request.uri_mut() = uri;
        }

        let mut rewritten = None;
        if let Some(ParsedBody(value)) = request.extensions_mut().get_mut::<ParsedBody>() {
            if sanitize_json(value) {
                rewritten = Some(serde_json::to_vec(value));
            }
        }
        if let Some(bytes) = rewritten {
            let bytes = bytes.map_err(|e| PipelineError::Internal(e.to_string()))?;
            tracing::debug!("Sanitized JSON body");
            request
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            *request.body_mut() = Body::from(bytes);
        }

        if let Some(uploads) = request.extensions_mut().get_mut::<Uploads>() {
            for value in uploads.fields.values_mut() {
                sanitize_json(value);
            }
            for file in &mut uploads.files {
                sanitize_in_place(&mut file.file_name);
            }
        }

        Ok(next.run(request).await)
    }
}
