//! Redis-backed [`HotStore`]. Uses `redis`'s async connection-manager so a dropped
//! connection is reconnected transparently rather than surfacing to every caller.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{EngineError, EngineResult, Tier};
use crate::hot_store::{HotRecord, HotStore};
use crate::model::{RecordMeta, SessionId};

const KEY_PREFIX: &str = "authstore:hot:";

fn record_key(session: &SessionId) -> String {
    format!("{KEY_PREFIX}{session}")
}

fn meta_key(session: &SessionId) -> String {
    format!("{KEY_PREFIX}{session}:meta")
}

pub struct RedisHotStore {
    conn: ConnectionManager,
}

impl RedisHotStore {
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let client = redis::Client::open(url).map_err(|e| EngineError::storage(Tier::Hot, e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| EngineError::storage(Tier::Hot, e))?;
        Ok(RedisHotStore { conn })
    }

    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        RedisHotStore { conn }
    }
}

#[async_trait]
impl HotStore for RedisHotStore {
    async fn get(&self, session: &SessionId) -> EngineResult<Option<HotRecord>> {
        let mut conn = self.conn.clone();
        let blob: Option<Vec<u8>> = conn
            .get(record_key(session))
            .await
            .map_err(|e| EngineError::storage(Tier::Hot, e))?;
        let Some(blob) = blob else { return Ok(None) };

        let meta_bytes: Option<Vec<u8>> = conn
            .get(meta_key(session))
            .await
            .map_err(|e| EngineError::storage(Tier::Hot, e))?;
        let meta: RecordMeta = match meta_bytes {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| EngineError::storage(Tier::Hot, IoError(e.to_string())))?,
            None => return Ok(None),
        };

        Ok(Some(HotRecord { blob, meta }))
    }

    /// Sets both keys and then `PEXPIREAT`s them to `record.meta.expires_at` — an
    /// absolute millisecond instant, not a relative TTL, so replicas that apply this
    /// write at slightly different wall-clock times still expire the entry at the same
    /// instant rather than drifting by however long replication took.
    async fn set(&self, session: &SessionId, record: HotRecord, _ttl: Duration) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let meta_bytes = serde_json::to_vec(&record.meta)
            .map_err(|e| EngineError::storage(Tier::Hot, IoError(e.to_string())))?;
        let expires_at_ms = record.meta.expires_at.timestamp_millis();

        redis::pipe()
            .atomic()
            .set(record_key(session), record.blob)
            .pexpire_at(record_key(session), expires_at_ms)
            .set(meta_key(session), meta_bytes)
            .pexpire_at(meta_key(session), expires_at_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| EngineError::storage(Tier::Hot, e))?;
        Ok(())
    }

    async fn delete(&self, session: &SessionId) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(&[record_key(session), meta_key(session)])
            .await
            .map_err(|e| EngineError::storage(Tier::Hot, e))?;
        Ok(())
    }

    async fn touch(&self, session: &SessionId, ttl: Duration) -> EngineResult<bool> {
        let mut conn = self.conn.clone();
        let expires_at_ms = chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let results: Vec<bool> = redis::pipe()
            .atomic()
            .pexpire_at(record_key(session), expires_at_ms)
            .pexpire_at(meta_key(session), expires_at_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| EngineError::storage(Tier::Hot, e))?;
        Ok(results.first().copied().unwrap_or(false))
    }

    async fn exists(&self, session: &SessionId) -> EngineResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(record_key(session))
            .await
            .map_err(|e| EngineError::storage(Tier::Hot, e))?;
        Ok(exists)
    }

    async fn ping(&self) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| EngineError::storage(Tier::Hot, e))?;
        Ok(())
    }
}

#[derive(Debug)]
struct IoError(String);

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {}
