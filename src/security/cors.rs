//! Origin policy (CORS).
//!
//! # Decision table
//! - no `Origin` header → allow, no CORS headers (server-to-server, curl)
//! - origin allowed → allow, echo origin, credentials if enabled
//! - origin not allowed → 403 `cors_rejected`
//!
//! Single-origin and allow-list deployments share one policy: the default
//! frontend origin is always allowed and `allowed_origins` extends it.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::config::CorsConfig;
use crate::error::PipelineError;
use crate::pipeline::{Next, Stage, StageResult};

/// Normalize an origin to `scheme://host[:port]` (lowercase, default port
/// elided). Returns `None` for anything without a tuple origin, e.g. `null`.
pub fn normalize_origin(origin: &str) -> Option<String> {
    let url = Url::parse(origin.trim()).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginMode {
    Single(String),
    List(Vec<String>),
}

/// Outcome of evaluating a request's `Origin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginDecision {
    /// No `Origin` header.
    NoOrigin,
    /// Allowed; carries the origin to echo back.
    Allowed(HeaderValue),
    Rejected(String),
}

/// Stage 4: allow-list evaluation and CORS response headers.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    mode: OriginMode,
    allow_credentials: bool,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    max_age: HeaderValue,
}

impl OriginPolicy {
    pub fn from_config(config: &CorsConfig) -> Self {
        let mut origins: Vec<String> = Vec::new();
        for raw in std::iter::once(&config.frontend_url).chain(&config.allowed_origins) {
            match normalize_origin(raw) {
                Some(origin) if !origins.contains(&origin) => origins.push(origin),
                Some(_) => {}
                None => tracing::warn!(origin = %raw, "Ignoring malformed allowed origin"),
            }
        }

        let mode = if config.allowed_origins.is_empty() && origins.len() == 1 {
            OriginMode::Single(origins.remove(0))
        } else {
            OriginMode::List(origins)
        };

        Self {
            mode,
            allow_credentials: config.allow_credentials,
            allow_methods: header_list(&config.allowed_methods),
            allow_headers: header_list(&config.allowed_headers),
            max_age: HeaderValue::from(config.max_age_secs),
        }
    }

    /// Whether `origin` passes the policy.
    pub fn is_allowed(&self, origin: &str) -> bool {
        let Some(origin) = normalize_origin(origin) else {
            return false;
        };
        match &self.mode {
            OriginMode::Single(allowed) => *allowed == origin,
            OriginMode::List(allowed) => allowed.iter().any(|a| *a == origin),
        }
    }

    pub fn decide(&self, origin: Option<&HeaderValue>) -> OriginDecision {
        let Some(value) = origin else {
            return OriginDecision::NoOrigin;
        };
        match value.to_str() {
            Ok(origin) if self.is_allowed(origin) => OriginDecision::Allowed(value.clone()),
            Ok(origin) => OriginDecision::Rejected(origin.to_string()),
            Err(_) => OriginDecision::Rejected(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        }
    }

    fn decorate(&self, response: &mut Response, origin: HeaderValue) {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    fn preflight(&self, origin: HeaderValue) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        self.decorate(&mut response, origin);
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        response
    }
}

fn header_list(items: &[String]) -> HeaderValue {
    HeaderValue::from_str(&items.join(",")).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn is_preflight(request: &Request<Body>) -> bool {
    request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

#[async_trait]
impl Stage for OriginPolicy {
    fn name(&self) -> &'static str {
        "origin_policy"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> StageResult {
        let decision = self.decide(request.headers().get(header::ORIGIN));
        match decision {
            OriginDecision::NoOrigin => Ok(next.run(request).await),
            OriginDecision::Rejected(origin) => Err(PipelineError::OriginRejected(origin)),
            OriginDecision::Allowed(origin) if is_preflight(&request) => Ok(self.preflight(origin)),
            OriginDecision::Allowed(origin) => {
                let mut response = next.run(request).await;
                self.decorate(&mut response, origin);
                Ok(response)
            }
        }
    }
}
