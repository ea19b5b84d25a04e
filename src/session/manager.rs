//! Session stage: resolve the cookie before dispatch, persist after.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Request},
    response::Response,
};
use ::cookie::Cookie;

use crate::config::{Environment, SessionConfig};
use crate::error::PipelineError;
use crate::observability::metrics;
use crate::pipeline::{Next, Stage, StageResult};
use crate::security::proxy::ClientAddr;
use crate::session::cookie::{self, SessionCookie};
use crate::session::Session;
use crate::store::{now_ms, SessionRecord, SessionStore};

/// Attempts at finding an unused id before giving up.
const CREATE_ATTEMPTS: usize = 3;

/// Stage 8: attach a [`Session`] to every request.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie: SessionCookie,
    ttl_ms: u64,
    rolling: bool,
}

impl SessionManager {
    pub fn new(config: &SessionConfig, environment: Environment, store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cookie: SessionCookie::new(
                &config.cookie_name,
                &config.secret,
                config.ttl_secs,
                environment.is_production(),
            ),
            ttl_ms: config.ttl().as_millis() as u64,
            rolling: config.rolling,
        }
    }

    /// The session named by the request's cookie, or a fresh one.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Session, PipelineError> {
        let Some(id) = self.cookie.read(headers) else {
            return Ok(Session::fresh());
        };

        Ok(match self.store.load(&id).await? {
            Some(record) => Session::loaded(record),
            None => Session::fresh(),
        })
    }

    /// Write back whatever the handler changed and set the cookie.
    ///
    /// `https` reports whether the client connection is encrypted. A `Secure`
    /// cookie is never sent over plain HTTP, and a session that could not be
    /// handed to the client is not created.
    pub async fn commit(
        &self,
        session: &Session,
        https: bool,
        response: &mut Response,
    ) -> Result<(), PipelineError> {
        let now = now_ms();
        let deliverable = https || !self.cookie.is_secure();
        let (record, replaced, persisted, modified, destroyed) = {
            let mut state = session.lock();
            let record = SessionRecord {
                id: state.id.clone(),
                data: state.data.clone(),
                created_at: if state.persisted { state.created_at } else { now },
                expires_at: state.expires_at,
            };
            (record, state.replaced.take(), state.persisted, state.modified, state.destroyed)
        };

        if let Some(old) = replaced {
            self.store.delete(&old).await?;
        }

        if destroyed {
            if persisted {
                self.store.delete(&record.id).await?;
            }
            metrics::record_session_saved("destroyed");
            if deliverable {
                self.set_cookie(response, self.cookie.removal())?;
            }
            return Ok(());
        }

        if !persisted {
            if !modified {
                return Ok(());
            }
            if !deliverable {
                tracing::debug!("Not issuing a secure session cookie over plain HTTP");
                return Ok(());
            }
            let record = self.create(record, now).await?;
            {
                let mut state = session.lock();
                state.id = record.id.clone();
                state.created_at = record.created_at;
                state.expires_at = record.expires_at;
                state.persisted = true;
                state.modified = false;
            }
            metrics::record_session_saved("created");
            return self.issue_cookie(response, &record.id);
        }

        if modified || self.rolling {
            let record = SessionRecord {
                expires_at: if self.rolling { now + self.ttl_ms } else { record.expires_at },
                ..record
            };
            self.store.save(&record).await?;
            session.lock().modified = false;
            metrics::record_session_saved("saved");

            if self.rolling && deliverable {
                self.issue_cookie(response, &record.id)?;
            }
        }
        Ok(())
    }

    async fn create(&self, mut record: SessionRecord, now: u64) -> Result<SessionRecord, PipelineError> {
        record.created_at = now;
        record.expires_at = now + self.ttl_ms;
        for _ in 0..CREATE_ATTEMPTS {
            if self.store.create(&record).await? {
                return Ok(record);
            }
            tracing::warn!("Session id collision, retrying with a new id");
            record.id = cookie::generate_id();
        }
        Err(PipelineError::Internal("could not allocate a session id".into()))
    }

    fn issue_cookie(&self, response: &mut Response, id: &str) -> Result<(), PipelineError> {
        let cookie = self
            .cookie
            .issue(id)
            .ok_or_else(|| PipelineError::Internal("session cookie was not signed".into()))?;
        self.set_cookie(response, cookie)
    }

    fn set_cookie(&self, response: &mut Response, cookie: Cookie<'static>) -> Result<(), PipelineError> {
        let value = HeaderValue::try_from(cookie.to_string())
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        response.headers_mut().append(header::SET_COOKIE, value);
        Ok(())
    }
}

#[async_trait]
impl Stage for SessionManager {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn handle(&self, mut request: Request<Body>, next: Next) -> StageResult {
        let session = self.resolve(request.headers()).await?;
        let https = request
            .extensions()
            .get::<ClientAddr>()
            .is_some_and(ClientAddr::is_https);
        request.extensions_mut().insert(session.clone());

        let mut response = next.run(request).await;
        self.commit(&session, https, &mut response).await?;
        Ok(response)
    }
}
