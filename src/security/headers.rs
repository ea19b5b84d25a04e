//! Security response headers.
//!
//! # Responsibilities
//! - Add defensive headers to every response passing the stage
//! - Leave headers a handler set explicitly untouched
//!
//! # Design Decisions
//! - Header values are built once at startup
//! - `Cross-Origin-Resource-Policy` is configurable so uploaded assets can be
//!   embedded by the frontend origin

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Request},
};

use crate::config::SecurityConfig;
use crate::pipeline::{Next, Stage, StageResult};

/// Stage 5: inject security headers.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn from_config(config: &SecurityConfig) -> Self {
        if !config.enable_headers {
            return Self { headers: Vec::new() };
        }

        let mut headers = vec![
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN")),
            (header::X_XSS_PROTECTION, HeaderValue::from_static("0")),
            (header::X_DNS_PREFETCH_CONTROL, HeaderValue::from_static("off")),
            (header::REFERRER_POLICY, HeaderValue::from_static("no-referrer")),
            (
                HeaderName::from_static("x-permitted-cross-domain-policies"),
                HeaderValue::from_static("none"),
            ),
            (HeaderName::from_static("x-download-options"), HeaderValue::from_static("noopen")),
            (
                HeaderName::from_static("cross-origin-opener-policy"),
                HeaderValue::from_static("same-origin"),
            ),
            (HeaderName::from_static("origin-agent-cluster"), HeaderValue::from_static("?1")),
        ];

        let configured = [
            ("cross-origin-resource-policy", config.cross_origin_resource_policy.as_str()),
            ("content-security-policy", config.content_security_policy.as_str()),
        ];
        for (name, value) in configured {
            if value.is_empty() {
                continue;
            }
            match HeaderValue::from_str(value) {
                Ok(value) => headers.push((HeaderName::from_static(name), value)),
                Err(_) => tracing::warn!(header = name, "Skipping header with invalid value"),
            }
        }

        if config.hsts_max_age_secs > 0 {
            let hsts = format!("max-age={}; includeSubDomains", config.hsts_max_age_secs);
            if let Ok(value) = HeaderValue::from_str(&hsts) {
                headers.push((header::STRICT_TRANSPORT_SECURITY, value));
            }
        }

        Self { headers }
    }
}

#[async_trait]
impl Stage for SecurityHeaders {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> StageResult {
        let mut response = next.run(request).await;
        let target = response.headers_mut();
        for (name, value) in &self.headers {
            if !target.contains_key(name) {
                target.insert(name.clone(), value.clone());
            }
        }
        target.remove("x-powered-by");
        Ok(response)
    }
}
