//! Server-side sessions behind a signed cookie.
//!
//! # Data Flow
//! ```text
//! Cookie: sid=<hmac><id>
//!     → cookie.rs   (verify signature)
//!     → manager.rs  (load from SessionStore, or start a fresh session)
//!     → handler     (Session extractor: get / insert / regenerate / destroy)
//!     → manager.rs  (persist if modified, Set-Cookie)
//! ```
//!
//! # Design Decisions
//! - A bad cookie is never an error: the client just gets a new session
//! - Sessions that were never written to are not stored and set no cookie
//! - Ids come from the OS CSPRNG and are inserted with create-if-absent
//! - In production the cookie is `Secure` and only issued over HTTPS

pub mod cookie;
pub mod manager;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::store::SessionRecord;

pub use manager::SessionManager;

#[derive(Debug)]
struct SessionState {
    id: String,
    data: Map<String, Value>,
    created_at: u64,
    expires_at: u64,
    /// Stored under `id`.
    persisted: bool,
    modified: bool,
    destroyed: bool,
    /// Stored id to delete after `regenerate`.
    replaced: Option<String>,
}

/// Handle to the current request's session.
///
/// Cloned into request extensions; every clone refers to the same state.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    /// A new, empty session that is not stored yet.
    pub(crate) fn fresh() -> Self {
        Self::with_state(SessionState {
            id: cookie::generate_id(),
            data: Map::new(),
            created_at: 0,
            expires_at: 0,
            persisted: false,
            modified: false,
            destroyed: false,
            replaced: None,
        })
    }

    pub(crate) fn loaded(record: SessionRecord) -> Self {
        Self::with_state(SessionState {
            id: record.id,
            data: record.data,
            created_at: record.created_at,
            expires_at: record.expires_at,
            persisted: true,
            modified: false,
            destroyed: false,
            replaced: None,
        })
    }

    fn with_state(state: SessionState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    /// Whether this session was started by the current request.
    pub fn is_new(&self) -> bool {
        !self.lock().persisted
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let state = self.lock();
        let value = state.data.get(key)?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        let mut state = self.lock();
        state.data.insert(key.to_string(), value);
        state.modified = true;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        let removed = state.data.remove(key);
        if removed.is_some() {
            state.modified = true;
        }
        removed
    }

    /// Copy of all session data.
    pub fn data(&self) -> Map<String, Value> {
        self.lock().data.clone()
    }

    /// Move the data to a new id, e.g. after login.
    pub fn regenerate(&self) {
        let mut state = self.lock();
        if state.persisted {
            let old = std::mem::replace(&mut state.id, cookie::generate_id());
            state.replaced = Some(old);
        } else {
            state.id = cookie::generate_id();
        }
        state.persisted = false;
        state.modified = true;
    }

    /// Drop the session, e.g. on logout.
    pub fn destroy(&self) {
        let mut state = self.lock();
        state.data.clear();
        state.destroyed = true;
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = PipelineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| PipelineError::Internal("session stage not installed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_session_is_unmodified() {
        let session = Session::fresh();
        assert!(session.is_new());
        assert!(!session.lock().modified);
        assert_eq!(session.get::<String>("user"), None);
    }

    #[test]
    fn test_insert_get_remove() {
        let session = Session::fresh();
        session.insert("user", "alice").unwrap();
        session.insert("roles", vec!["admin"]).unwrap();

        assert_eq!(session.get::<String>("user").as_deref(), Some("alice"));
        assert_eq!(session.get::<Vec<String>>("roles"), Some(vec!["admin".to_string()]));
        assert_eq!(session.remove("user"), Some(json!("alice")));
        assert_eq!(session.remove("user"), None);
    }

    #[test]
    fn test_clones_share_state() {
        let session = Session::fresh();
        let clone = session.clone();
        clone.insert("k", 1).unwrap();
        assert_eq!(session.get::<i32>("k"), Some(1));
    }

    #[test]
    fn test_regenerate_remembers_stored_id() {
        let session = Session::loaded(SessionRecord {
            id: "old".into(),
            data: Map::new(),
            created_at: 1,
            expires_at: u64::MAX,
        });
        assert!(!session.is_new());
        session.regenerate();

        let state = session.lock();
        assert_ne!(state.id, "old");
        assert_eq!(state.replaced.as_deref(), Some("old"));
        assert!(state.modified);
    }
}
