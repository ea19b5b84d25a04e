//! Request admission pipeline.
//!
//! # Data Flow
//! ```text
//! Request
//!     → proxy trust      (ClientAddr)
//!     → body parsing     (ParsedBody / Uploads)
//!     → static uploads   (short-circuits under the uploads prefix)
//!     → origin policy    (403 or CORS headers)
//!     → security headers
//!     → sanitizer        (query, path, body rewritten in place)
//!     → rate limiter     (API prefix only, 429)
//!     → sessions         (Session extension, Set-Cookie)
//!     → route dispatch   (axum Router)
//! Stage errors → PipelineError::into_response (error.rs)
//! ```
//!
//! # Design Decisions
//! - Stage order is an explicit list built by [`PipelineBuilder`]
//! - A stage sees its successors only through [`Next`]
//! - Errors are translated at the stage boundary, so earlier stages can still
//!   decorate rejection responses (CORS and security headers on a 429)

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
    Router,
};
use tower::{Service, ServiceExt};

use crate::config::GatewayConfig;
use crate::error::PipelineError;
use crate::http::body::BodyParser;
use crate::http::static_files::StaticUploads;
use crate::observability::metrics;
use crate::security::cors::OriginPolicy;
use crate::security::headers::SecurityHeaders;
use crate::security::proxy::ProxyTrust;
use crate::security::rate_limit::RateLimiter;
use crate::security::sanitize::Sanitizer;
use crate::session::SessionManager;
use crate::store::Stores;

/// Outcome of a stage.
pub type StageResult = Result<Response, PipelineError>;

/// One policy in the pipeline.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handle the request, calling `next.run` to continue, or returning early
    /// to short-circuit.
    async fn handle(&self, request: Request<Body>, next: Next) -> StageResult;
}

struct Chain {
    stages: Vec<Arc<dyn Stage>>,
    endpoint: Router,
}

/// The remainder of the pipeline after the current stage.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    /// Run the remaining stages and the endpoint.
    pub async fn run(self, request: Request<Body>) -> Response {
        let Some(stage) = self.chain.stages.get(self.index).cloned() else {
            return match self.chain.endpoint.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
        };

        let next = Next {
            chain: self.chain.clone(),
            index: self.index + 1,
        };
        match stage.handle(request, next).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(stage = stage.name(), reason = err.reason(), "Stage rejected request");
                err.into_response()
            }
        }
    }
}

/// Builds a pipeline from an explicit, ordered list of stages.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard stage order, configured from `config`.
    pub fn standard(config: &GatewayConfig, stores: &Stores) -> Self {
        let mut builder = Self::new()
            .stage(ProxyTrust::new(&config.proxy))
            .stage(BodyParser::new(&config.body));

        if config.uploads.enabled {
            builder = builder.stage(StaticUploads::new(&config.uploads));
        }

        builder = builder
            .stage(OriginPolicy::from_config(&config.cors))
            .stage(SecurityHeaders::from_config(&config.security));

        if config.sanitize.enabled {
            builder = builder.stage(Sanitizer::new());
        }
        if config.rate_limit.enabled {
            builder = builder.stage(RateLimiter::new(&config.rate_limit, stores.counters.clone()));
        }

        builder.stage(SessionManager::new(
            &config.session,
            config.environment,
            stores.sessions.clone(),
        ))
    }

    /// Append a stage.
    pub fn stage<S: Stage>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Names of the configured stages, in order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Finish the pipeline in front of `endpoint`.
    pub fn build(self, endpoint: Router) -> Pipeline {
        tracing::debug!(stages = ?self.stage_names(), "Pipeline built");
        Pipeline {
            chain: Arc::new(Chain {
                stages: self.stages,
                endpoint,
            }),
        }
    }
}

/// A built pipeline; a `tower::Service` that never fails.
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<Chain>,
}

impl Pipeline {
    /// Run a request through every stage.
    pub async fn dispatch(&self, request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();

        let next = Next {
            chain: self.chain.clone(),
            index: 0,
        };
        let response = next.run(request).await;

        metrics::record_request(&method, response.status().as_u16(), start);
        response
    }
}

impl Service<Request<Body>> for Pipeline {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let pipeline = self.clone();
        Box::pin(async move { Ok(pipeline.dispatch(request).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use axum::routing::get;
    use std::sync::Mutex;

    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Stage for Record {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn handle(&self, request: Request<Body>, next: Next) -> StageResult {
            self.log.lock().unwrap().push(self.label);
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .append("x-seen", HeaderValue::from_static(self.label));
            Ok(response)
        }
    }

    struct Reject;

    #[async_trait]
    impl Stage for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        async fn handle(&self, _request: Request<Body>, _next: Next) -> StageResult {
            Err(PipelineError::Internal("nope".into()))
        }
    }

    fn endpoint() -> Router {
        Router::new().route("/", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new()
            .stage(Record { label: "first", log: log.clone() })
            .stage(Record { label: "second", log: log.clone() })
            .build(endpoint());

        let response = pipeline
            .dispatch(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        let seen: Vec<_> = response.headers().get_all("x-seen").iter().collect();
        assert_eq!(seen, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_rejection_is_translated_and_decorated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new()
            .stage(Record { label: "outer", log: log.clone() })
            .stage(Reject)
            .stage(Record { label: "inner", log: log.clone() })
            .build(endpoint());

        let response = pipeline
            .dispatch(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(*log.lock().unwrap(), vec!["outer"]);
        assert_eq!(response.headers()["x-seen"], "outer");
    }

    #[test]
    fn test_standard_order() {
        let config = GatewayConfig::default();
        let builder = PipelineBuilder::standard(&config, &Stores::memory());
        assert_eq!(
            builder.stage_names(),
            vec![
                "proxy_trust",
                "body_parser",
                "static_uploads",
                "origin_policy",
                "security_headers",
                "sanitizer",
                "rate_limiter",
                "session",
            ]
        );
    }
}
