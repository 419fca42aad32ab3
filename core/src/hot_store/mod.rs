//! The hot tier: a low-latency cache holding the encoded blob plus metadata for every
//! live session. [`MemoryHotStore`] is the in-process reference implementation used by
//! tests; [`RedisHotStore`] is the production backend.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryHotStore;
pub use redis_store::RedisHotStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::model::{RecordMeta, SessionId};

/// The blob plus its metadata, as stored in the hot tier.
#[derive(Clone, Debug, PartialEq)]
pub struct HotRecord {
    pub blob: Vec<u8>,
    pub meta: RecordMeta,
}

#[async_trait]
pub trait HotStore: Send + Sync {
    async fn get(&self, session: &SessionId) -> EngineResult<Option<HotRecord>>;

    async fn set(&self, session: &SessionId, record: HotRecord, ttl: Duration) -> EngineResult<()>;

    async fn delete(&self, session: &SessionId) -> EngineResult<()>;

    /// Resets TTL without touching the stored value.
    async fn touch(&self, session: &SessionId, ttl: Duration) -> EngineResult<bool>;

    async fn exists(&self, session: &SessionId) -> EngineResult<bool>;

    async fn ping(&self) -> EngineResult<()>;
}
