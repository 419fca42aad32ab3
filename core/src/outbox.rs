//! The write-behind queue standing between a committed hot-tier write and its durable
//! cold-tier counterpart. Entries are appended in order and drained by the
//! [`crate::reconciler::Reconciler`]; see it for the claim/complete/fail lifecycle.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;

use crate::model::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEntry {
    pub id: u64,
    pub session: SessionId,
    pub version: u64,
    pub blob: Vec<u8>,
    pub fencing_token: Option<u64>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub is_tombstone: bool,
}

#[derive(Clone, Debug, Default)]
pub struct OutboxStats {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
}

struct Inner {
    next_id: u64,
    by_session: HashMap<SessionId, Vec<OutboxEntry>>,
    pending_ids: VecDeque<(SessionId, u64)>,
}

/// A per-session FIFO list plus a global pending index, matching the reserved-key-prefix
/// layout the hot tier would use in a shared-process deployment — kept here as a
/// dedicated in-process structure rather than threading raw list operations through
/// [`crate::hot_store::HotStore`], which only exposes whole-record get/set/delete.
pub struct Outbox {
    inner: Mutex<Inner>,
}

impl Outbox {
    pub fn new() -> Self {
        Outbox {
            inner: Mutex::new(Inner {
                next_id: 1,
                by_session: HashMap::new(),
                pending_ids: VecDeque::new(),
            }),
        }
    }

    pub async fn enqueue(
        &self,
        session: SessionId,
        version: u64,
        blob: Vec<u8>,
        fencing_token: Option<u64>,
        is_tombstone: bool,
    ) -> u64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let entry = OutboxEntry {
            id,
            session: session.clone(),
            version,
            blob,
            fencing_token,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            is_tombstone,
        };
        inner.by_session.entry(session.clone()).or_default().push(entry);
        inner.pending_ids.push_back((session, id));
        crate::metrics::record_queue_publish();
        id
    }

    /// Marks up to `batch_size` pending entries as `processing` and returns them,
    /// oldest-enqueued first.
    pub async fn claim(&self, batch_size: usize) -> Vec<OutboxEntry> {
        let mut inner = self.inner.lock().await;
        let mut claimed = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            let Some((session, id)) = inner.pending_ids.pop_front() else { break };
            if let Some(entries) = inner.by_session.get_mut(&session) {
                if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
                    if entry.status == OutboxStatus::Pending {
                        entry.status = OutboxStatus::Processing;
                        claimed.push(entry.clone());
                    }
                }
            }
        }
        claimed
    }

    pub async fn complete(&self, session: &SessionId, id: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(entries) = inner.by_session.get_mut(session) {
            entries.retain(|e| e.id != id);
        }
    }

    /// Records a failed attempt. After `max_attempts` the entry is dead-lettered
    /// (`failed`) and removed from the pending index, but stays in the per-session list
    /// so [`Outbox::stats`] keeps reporting it.
    pub async fn fail(&self, session: &SessionId, id: u64, error: String, max_attempts: u32) {
        let mut inner = self.inner.lock().await;
        let mut requeue = false;
        if let Some(entries) = inner.by_session.get_mut(session) {
            if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
                entry.attempts += 1;
                entry.last_error = Some(error);
                if entry.attempts >= max_attempts {
                    entry.status = OutboxStatus::Failed;
                } else {
                    entry.status = OutboxStatus::Pending;
                    requeue = true;
                }
            }
        }
        if requeue {
            inner.pending_ids.push_back((session.clone(), id));
        }
        crate::metrics::record_queue_failure();
    }

    /// Pending entries queued for one session, used by the engine to decide when a
    /// session's backlog has grown past `writeBehind.queueSize` and writes should fall
    /// back to a synchronous cold-tier put instead of enqueueing further.
    pub async fn session_pending_count(&self, session: &SessionId) -> usize {
        let inner = self.inner.lock().await;
        inner
            .by_session
            .get(session)
            .map(|entries| entries.iter().filter(|e| e.status == OutboxStatus::Pending).count())
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> OutboxStats {
        let inner = self.inner.lock().await;
        let mut stats = OutboxStats::default();
        for entries in inner.by_session.values() {
            for entry in entries {
                match entry.status {
                    OutboxStatus::Pending => stats.pending += 1,
                    OutboxStatus::Processing => stats.processing += 1,
                    OutboxStatus::Failed => stats.failed += 1,
                    OutboxStatus::Completed => {}
                }
            }
        }
        stats
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_claim_preserves_fifo_order() {
        let outbox = Outbox::new();
        let s1 = SessionId::new("s1").unwrap();
        outbox.enqueue(s1.clone(), 1, vec![1], None, false).await;
        outbox.enqueue(s1.clone(), 2, vec![2], None, false).await;

        let claimed = outbox.claim(10).await;
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].version, 1);
        assert_eq!(claimed[1].version, 2);
    }

    #[tokio::test]
    async fn failed_entry_requeues_until_max_attempts_then_dead_letters() {
        let outbox = Outbox::new();
        let s1 = SessionId::new("s1").unwrap();
        let id = outbox.enqueue(s1.clone(), 1, vec![1], None, false).await;

        outbox.claim(1).await;
        outbox.fail(&s1, id, "boom".into(), 2).await;
        assert_eq!(outbox.stats().await.pending, 1);

        outbox.claim(1).await;
        outbox.fail(&s1, id, "boom again".into(), 2).await;
        assert_eq!(outbox.stats().await.failed, 1);
        assert_eq!(outbox.stats().await.pending, 0);
    }

    #[tokio::test]
    async fn session_pending_count_tracks_only_unclaimed_entries() {
        let outbox = Outbox::new();
        let s1 = SessionId::new("s1").unwrap();
        outbox.enqueue(s1.clone(), 1, vec![1], None, false).await;
        outbox.enqueue(s1.clone(), 2, vec![2], None, false).await;
        assert_eq!(outbox.session_pending_count(&s1).await, 2);

        outbox.claim(1).await;
        assert_eq!(outbox.session_pending_count(&s1).await, 1);
    }

    #[tokio::test]
    async fn complete_removes_entry_entirely() {
        let outbox = Outbox::new();
        let s1 = SessionId::new("s1").unwrap();
        let id = outbox.enqueue(s1.clone(), 1, vec![1], None, false).await;
        outbox.claim(1).await;
        outbox.complete(&s1, id).await;

        let stats = outbox.stats().await;
        assert_eq!(stats.pending + stats.processing + stats.failed, 0);
    }
}
