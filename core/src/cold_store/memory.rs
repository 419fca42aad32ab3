//! In-process reference [`ColdStore`], backed by a `parking_lot`-guarded map. Mirrors
//! the conditional-put semantics the production Mongo backend expresses as a
//! `find_one_and_update`, without needing an external database for tests.

use parking_lot::Mutex;
use std::collections::HashMap;

use async_trait::async_trait;

use crate::cold_store::{ColdDocument, ColdStore, ConditionalPutResult};
use crate::error::EngineResult;
use crate::model::SessionId;

pub struct MemoryColdStore {
    docs: Mutex<HashMap<SessionId, ColdDocument>>,
}

impl MemoryColdStore {
    pub fn new() -> Self {
        MemoryColdStore {
            docs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryColdStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ColdStore for MemoryColdStore {
    async fn get(&self, session: &SessionId) -> EngineResult<Option<ColdDocument>> {
        Ok(self.docs.lock().get(session).cloned())
    }

    async fn conditional_put(
        &self,
        session: &SessionId,
        document: ColdDocument,
        expected_version: u64,
    ) -> EngineResult<ConditionalPutResult> {
        let mut docs = self.docs.lock();
        match docs.get(session) {
            Some(current) if current.meta.version != expected_version => {
                Ok(ConditionalPutResult {
                    applied: false,
                    current: Some(current.clone()),
                })
            }
            Some(_) => {
                docs.insert(session.clone(), document);
                Ok(ConditionalPutResult { applied: true, current: None })
            }
            None if expected_version == 0 => {
                docs.insert(session.clone(), document);
                Ok(ConditionalPutResult { applied: true, current: None })
            }
            None => Ok(ConditionalPutResult { applied: false, current: None }),
        }
    }

    async fn delete(&self, session: &SessionId) -> EngineResult<()> {
        self.docs.lock().remove(session);
        Ok(())
    }

    async fn ping(&self) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(version: u64) -> ColdDocument {
        ColdDocument {
            blob: vec![version as u8],
            meta: crate::model::RecordMeta {
                version,
                fencing_token: None,
                updated_at: chrono::Utc::now(),
                expires_at: chrono::Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn first_write_requires_expected_version_zero() {
        let store = MemoryColdStore::new();
        let session = SessionId::new("s1").unwrap();

        let rejected = store.conditional_put(&session, doc(1), 1).await.unwrap();
        assert!(!rejected.applied);

        let applied = store.conditional_put(&session, doc(1), 0).await.unwrap();
        assert!(applied.applied);
    }

    #[tokio::test]
    async fn stale_expected_version_returns_current_document() {
        let store = MemoryColdStore::new();
        let session = SessionId::new("s1").unwrap();
        store.conditional_put(&session, doc(1), 0).await.unwrap();

        let result = store.conditional_put(&session, doc(3), 99).await.unwrap();
        assert!(!result.applied);
        assert_eq!(result.current.unwrap().meta.version, 1);
    }
}
