//! Redis-backed stores for multi-instance deployments.
//!
//! - Counters: `SET key 0 PX window NX` + `INCR` + `PTTL` in one MULTI/EXEC,
//!   so every instance sees the same window and no hit is lost.
//! - Sessions: JSON values with a `PX` expiry; creation uses `SET NX`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::store::{now_ms, CounterStore, SessionRecord, SessionStore, StoreError, WindowState};

const COUNTER_PREFIX: &str = "gateway:ratelimit:";
const SESSION_PREFIX: &str = "gateway:session:";

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Open a managed connection (reconnects automatically).
pub async fn connect(url: &str) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(url)?;
    Ok(client.get_connection_manager().await?)
}

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowState, StoreError> {
        let key = format!("{COUNTER_PREFIX}{key}");
        let window_ms = window.as_millis().max(1) as u64;
        let mut conn = self.conn.clone();

        let (count, pttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(0)
            .arg("PX")
            .arg(window_ms)
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        let resets_in = if pttl > 0 {
            Duration::from_millis(pttl as u64)
        } else {
            window
        };
        Ok(WindowState { count, resets_in })
    }
}

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn ttl_ms(record: &SessionRecord) -> u64 {
        record.expires_at.saturating_sub(now_ms()).max(1)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(format!("{SESSION_PREFIX}{id}"))
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(raw) => {
                let record: SessionRecord = serde_json::from_str(&raw)?;
                Ok((!record.is_expired(now_ms())).then_some(record))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, record: &SessionRecord) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(format!("{SESSION_PREFIX}{}", record.id))
            .arg(serde_json::to_string(record)?)
            .arg("PX")
            .arg(Self::ttl_ms(record))
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(format!("{SESSION_PREFIX}{}", record.id))
            .arg(serde_json::to_string(record)?)
            .arg("PX")
            .arg(Self::ttl_ms(record))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(format!("{SESSION_PREFIX}{id}"))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
