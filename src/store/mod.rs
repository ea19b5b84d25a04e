//! Shared state stores.
//!
//! # Data Flow
//! ```text
//! rate_limit stage ──hit(key, window)──▶ CounterStore ──▶ memory (DashMap) | redis
//! session stage ──load/create/save──▶ SessionStore ──▶ memory (DashMap) | redis
//! ```
//!
//! # Design Decisions
//! - Each store operation is atomic on its own; nothing spans stages
//! - In-process stores are only correct for a single instance; multiple
//!   instances must share an external store (`redis://`, feature `redis`)
//! - Expiry is enforced on read; a sweeper reclaims memory in the background

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::StoreConfig;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported store url `{0}`")]
    UnsupportedUrl(String),
}

/// State of a client's counter after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Hits in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub resets_in: Duration,
}

/// Fixed-window hit counter.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Count one hit for `key` and return the window state after the increment.
    ///
    /// Starts a new window when none exists or the previous one elapsed.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, StoreError>;

    /// Drop windows that have elapsed. Returns how many were removed.
    async fn purge_expired(&self) -> usize {
        0
    }
}

/// A persisted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub data: Map<String, Value>,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds.
    pub expires_at: u64,
}

impl SessionRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Server-side session storage.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Fetch a live session. Expired records read as `None`.
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Insert a new session only if its id is unused.
    /// Returns `false` when the id is already taken.
    async fn create(&self, record: &SessionRecord) -> Result<bool, StoreError>;

    /// Insert or replace a session.
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Drop expired sessions. Returns how many were removed.
    async fn purge_expired(&self) -> usize {
        0
    }
}

/// The store pair shared by all requests.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub counters: Arc<dyn CounterStore>,
}

impl Stores {
    /// In-process stores.
    pub fn memory() -> Self {
        Self {
            sessions: Arc::new(memory::MemorySessionStore::new()),
            counters: Arc::new(memory::MemoryCounterStore::new()),
        }
    }

    /// Connect the stores named by `config.url`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config.url.as_str();
        if url.starts_with("memory://") {
            tracing::info!("Using in-process session and rate-limit stores");
            return Ok(Self::memory());
        }

        #[cfg(feature = "redis")]
        {
            if url.starts_with("redis://") || url.starts_with("rediss://") {
                let conn = redis_store::connect(url).await?;
                tracing::info!("Connected to shared redis store");
                return Ok(Self {
                    sessions: Arc::new(redis_store::RedisSessionStore::new(conn.clone())),
                    counters: Arc::new(redis_store::RedisCounterStore::new(conn)),
                });
            }
        }

        Err(StoreError::UnsupportedUrl(url.to_string()))
    }

    /// Periodically purge expired entries until shutdown.
    pub fn spawn_sweeper(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let stores = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sessions = stores.sessions.purge_expired().await;
                        let windows = stores.counters.purge_expired().await;
                        if sessions + windows > 0 {
                            tracing::debug!(sessions, windows, "Purged expired store entries");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
