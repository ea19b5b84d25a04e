//! In-process stores backed by `DashMap`.
//!
//! Correct for a single gateway instance only: counters and sessions are not
//! shared across processes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::store::{now_ms, CounterStore, SessionRecord, SessionStore, StoreError, WindowState};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started: Instant,
    length: Duration,
}

/// Fixed-window counters keyed by client.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    inner: Arc<DashMap<String, Window>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, StoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so the reset and increment
        // below happen as one step for this key.
        let mut entry = self.inner.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
            length: window,
        });

        let elapsed = now.duration_since(entry.started);
        if elapsed >= window {
            entry.count = 0;
            entry.started = now;
        }
        entry.length = window;
        entry.count += 1;

        Ok(WindowState {
            count: entry.count,
            resets_in: window.saturating_sub(now.duration_since(entry.started)),
        })
    }

    async fn purge_expired(&self) -> usize {
        let before = self.inner.len();
        let now = Instant::now();
        self.inner
            .retain(|_, w| now.duration_since(w.started) < w.length);
        before.saturating_sub(self.inner.len())
    }
}

/// Sessions held in process memory.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<DashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let record = self.inner.get(id).map(|r| r.value().clone());
        match record {
            Some(record) if record.is_expired(now_ms()) => {
                self.inner.remove_if(id, |_, r| r.is_expired(now_ms()));
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn create(&self, record: &SessionRecord) -> Result<bool, StoreError> {
        match self.inner.entry(record.id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now_ms()) {
                    occupied.insert(record.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.inner.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove(id);
        Ok(())
    }

    async fn purge_expired(&self) -> usize {
        let before = self.inner.len();
        let now = now_ms();
        self.inner.retain(|_, r| !r.is_expired(now));
        before.saturating_sub(self.inner.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn record(id: &str, expires_at: u64) -> SessionRecord {
        let mut data = Map::new();
        data.insert("user".into(), json!("alice"));
        SessionRecord {
            id: id.into(),
            data,
            created_at: now_ms(),
            expires_at,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_counts_then_resets() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(900);

        for expected in 1..=3 {
            let state = store.hit("10.0.0.1", window).await.unwrap();
            assert_eq!(state.count, expected);
        }

        tokio::time::advance(Duration::from_secs(600)).await;
        let state = store.hit("10.0.0.1", window).await.unwrap();
        assert_eq!(state.count, 4);
        assert_eq!(state.resets_in, Duration::from_secs(300));

        tokio::time::advance(Duration::from_secs(300)).await;
        let state = store.hit("10.0.0.1", window).await.unwrap();
        assert_eq!(state.count, 1);
        assert_eq!(state.resets_in, window);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(60);
        store.hit("a", window).await.unwrap();
        store.hit("a", window).await.unwrap();
        assert_eq!(store.hit("b", window).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_hits_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::new());
        let window = Duration::from_secs(900);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.hit("shared", window).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.hit("shared", window).await.unwrap().count, 16 * 50 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_elapsed_windows() {
        let store = MemoryCounterStore::new();
        store.hit("old", Duration::from_secs(10)).await.unwrap();
        store.hit("new", Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_session_create_is_exclusive() {
        let store = MemorySessionStore::new();
        let live = record("abc", now_ms() + 60_000);

        assert!(store.create(&live).await.unwrap());
        assert!(!store.create(&live).await.unwrap());
        assert_eq!(store.load("abc").await.unwrap(), Some(live));
    }

    #[tokio::test]
    async fn test_expired_session_reads_as_missing() {
        let store = MemorySessionStore::new();
        store.save(&record("old", now_ms() - 1)).await.unwrap();

        assert_eq!(store.load("old").await.unwrap(), None);
        assert!(store.is_empty());

        // An expired id may be claimed again.
        store.save(&record("old", now_ms() - 1)).await.unwrap();
        assert!(store.create(&record("old", now_ms() + 1_000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_purge() {
        let store = MemorySessionStore::new();
        store.save(&record("a", now_ms() + 60_000)).await.unwrap();
        store.save(&record("b", now_ms() - 1)).await.unwrap();

        assert_eq!(store.purge_expired().await, 1);
        store.delete("a").await.unwrap();
        assert!(store.is_empty());
    }
}
