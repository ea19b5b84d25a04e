//! Fixed-window rate limiting for the API prefix.
//!
//! Counts one hit per request per client (keyed by the resolved
//! [`ClientAddr`]) in a [`CounterStore`]. The 101st request of a 100-request
//! window is rejected with 429 until the window elapses.
//!
//! The increment runs on its own task so a client hanging up mid-request
//! cannot cancel the hit after the store has accepted it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderValue, Request},
};

use crate::config::RateLimitConfig;
use crate::error::PipelineError;
use crate::pipeline::{Next, Stage, StageResult};
use crate::security::proxy::ClientAddr;
use crate::store::{CounterStore, StoreError, WindowState};

/// Result of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u64, resets_in: Duration },
    Limited { retry_after: Duration },
}

/// Stage 7: per-client request ceiling under `path_prefix`.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    path_prefix: String,
    window: Duration,
    max_requests: u64,
    message: String,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            path_prefix: config.path_prefix.clone(),
            window: config.window(),
            max_requests: config.max_requests,
            message: config.message.clone(),
        }
    }

    /// Whether `path` is subject to limiting.
    pub fn applies_to(&self, path: &str) -> bool {
        path.starts_with(&self.path_prefix)
            || path == self.path_prefix.trim_end_matches('/')
    }

    /// Count a hit for `key`.
    pub async fn check(&self, key: &str) -> Result<Decision, StoreError> {
        let store = self.store.clone();
        let window = self.window;
        let owned_key = key.to_string();

        let state = tokio::spawn(async move { store.hit(&owned_key, window).await })
            .await
            .map_err(|e| StoreError::Unavailable(format!("counter task failed: {e}")))??;

        Ok(self.decide(state))
    }

    fn decide(&self, state: WindowState) -> Decision {
        if state.count > self.max_requests {
            Decision::Limited {
                retry_after: state.resets_in,
            }
        } else {
            Decision::Allowed {
                remaining: self.max_requests - state.count,
                resets_in: state.resets_in,
            }
        }
    }
}

/// Whole seconds, rounded up so clients never retry early.
fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[async_trait]
impl Stage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    async fn handle(&self, request: Request<Body>, next: Next) -> StageResult {
        if !self.applies_to(request.uri().path()) {
            return Ok(next.run(request).await);
        }

        let client = request
            .extensions()
            .get::<ClientAddr>()
            .map(|c| c.ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        match self.check(&client).await? {
            Decision::Limited { retry_after } => Err(PipelineError::RateLimited {
                client,
                message: self.message.clone(),
                retry_after_secs: ceil_secs(retry_after),
                limit: self.max_requests,
            }),
            Decision::Allowed {
                remaining,
                resets_in,
            } => {
                let mut response = next.run(request).await;
                let headers = response.headers_mut();
                headers.insert("ratelimit-limit", HeaderValue::from(self.max_requests));
                headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
                headers.insert("ratelimit-reset", HeaderValue::from(ceil_secs(resets_in)));
                Ok(response)
            }
        }
    }
}
