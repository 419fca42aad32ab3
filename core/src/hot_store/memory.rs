//! In-process reference [`HotStore`], used by tests and by callers with no external
//! cache available. A sharded map (`dashmap`) holding each session's record plus its
//! expiry instant; a lazy sweep on access evicts anything past its deadline instead of
//! running a background reaper.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::EngineResult;
use crate::hot_store::{HotRecord, HotStore};
use crate::model::SessionId;

struct Entry {
    record: HotRecord,
    expires_at: Instant,
}

pub struct MemoryHotStore {
    data: DashMap<SessionId, Entry>,
}

impl MemoryHotStore {
    pub fn new() -> Self {
        MemoryHotStore { data: DashMap::new() }
    }

    fn is_live(entry: &Entry) -> bool {
        entry.expires_at > Instant::now()
    }
}

impl Default for MemoryHotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn get(&self, session: &SessionId) -> EngineResult<Option<HotRecord>> {
        let expired = match self.data.get(session) {
            Some(entry) if Self::is_live(&entry) => return Ok(Some(entry.record.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.data.remove(session);
        }
        Ok(None)
    }

    async fn set(&self, session: &SessionId, record: HotRecord, ttl: Duration) -> EngineResult<()> {
        self.data.insert(
            session.clone(),
            Entry {
                record,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, session: &SessionId) -> EngineResult<()> {
        self.data.remove(session);
        Ok(())
    }

    async fn touch(&self, session: &SessionId, ttl: Duration) -> EngineResult<bool> {
        let expired = {
            match self.data.get_mut(session) {
                Some(mut entry) if Self::is_live(&entry) => {
                    entry.expires_at = Instant::now() + ttl;
                    return Ok(true);
                }
                Some(_) => true,
                None => return Ok(false),
            }
        };
        if expired {
            self.data.remove(session);
        }
        Ok(false)
    }

    async fn exists(&self, session: &SessionId) -> EngineResult<bool> {
        Ok(matches!(self.data.get(session), Some(entry) if Self::is_live(&entry)))
    }

    async fn ping(&self) -> EngineResult<()> {
        Ok(())
    }
}
