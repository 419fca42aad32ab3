//! The cold tier: one durable document per session, the source of truth the hot tier
//! is a cache in front of. [`MemoryColdStore`] is the in-process reference
//! implementation used by tests; [`MongoColdStore`] is the production backend.

pub mod memory;
pub mod mongo_store;

pub use memory::MemoryColdStore;
pub use mongo_store::MongoColdStore;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::model::{RecordMeta, SessionId};

#[derive(Clone, Debug, PartialEq)]
pub struct ColdDocument {
    pub blob: Vec<u8>,
    pub meta: RecordMeta,
}

/// Outcome of a [`ColdStore::conditional_put`]. On rejection, `current` carries the
/// document actually on file so the caller can decide whether to refetch and re-apply.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionalPutResult {
    pub applied: bool,
    pub current: Option<ColdDocument>,
}

#[async_trait]
pub trait ColdStore: Send + Sync {
    async fn get(&self, session: &SessionId) -> EngineResult<Option<ColdDocument>>;

    /// Atomic compare-and-set on `version == expected_version`. `expected_version == 0`
    /// succeeds only if no document exists yet.
    async fn conditional_put(
        &self,
        session: &SessionId,
        document: ColdDocument,
        expected_version: u64,
    ) -> EngineResult<ConditionalPutResult>;

    async fn delete(&self, session: &SessionId) -> EngineResult<()>;

    async fn ping(&self) -> EngineResult<()>;
}
