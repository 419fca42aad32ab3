//! Long-lived worker draining the [`Outbox`] into the cold tier. Sessions progress in
//! parallel up to a configured concurrency; within a session, entries are committed
//! strictly in ascending version order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitBreaker;
use crate::cold_store::{ColdDocument, ColdStore};
use crate::hot_store::HotStore;
use crate::model::RecordMeta;
use crate::outbox::{Outbox, OutboxEntry};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconcilerConfig {
    pub batch_size: usize,
    pub max_concurrent_sessions: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub poll_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            batch_size: 64,
            max_concurrent_sessions: 16,
            max_attempts: 8,
            base_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// `base * multiplier^attempt`, capped at `max`, with full jitter (uniform in
/// `[0, capped_delay]`) so retrying sessions don't thunder against the cold tier in
/// lockstep after a shared outage.
pub fn backoff_delay(config: &ReconcilerConfig, attempt: u32) -> Duration {
    let exp = config.backoff_multiplier.powi(attempt as i32);
    let capped_ms = (config.base_backoff.as_millis() as f64 * exp)
        .min(config.max_backoff.as_millis() as f64);
    let jittered_ms = rand::thread_rng().gen_range(0.0..=capped_ms.max(1.0));
    Duration::from_millis(jittered_ms as u64)
}

pub struct Reconciler<H: HotStore, C: ColdStore> {
    outbox: Arc<Outbox>,
    hot: Arc<H>,
    cold: Arc<C>,
    breaker: Arc<CircuitBreaker>,
    config: ReconcilerConfig,
    record_ttl: Duration,
}

impl<H: HotStore + 'static, C: ColdStore + 'static> Reconciler<H, C> {
    pub fn new(
        outbox: Arc<Outbox>,
        hot: Arc<H>,
        cold: Arc<C>,
        breaker: Arc<CircuitBreaker>,
        config: ReconcilerConfig,
        record_ttl: Duration,
    ) -> Self {
        Reconciler { outbox, hot, cold, breaker, config, record_ttl }
    }

    /// Spawns the background drain loop; drop the returned `CancellationToken` guard
    /// (or call `cancel()` on it) to stop the worker cooperatively.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, CancellationToken) {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = tokio::spawn(async move {
            self.run(worker_token).await;
        });
        (handle, token)
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if self.breaker.is_open() {
                continue;
            }

            let batch = self.outbox.claim(self.config.batch_size).await;
            if batch.is_empty() {
                continue;
            }

            let mut by_session: HashMap<_, Vec<OutboxEntry>> = HashMap::new();
            for entry in batch {
                by_session.entry(entry.session.clone()).or_default().push(entry);
            }
            for entries in by_session.values_mut() {
                entries.sort_by_key(|e| e.version);
            }

            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sessions));
            let mut handles = Vec::new();
            for (_session, entries) in by_session {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let this = self.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    this.drain_session(entries).await;
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    async fn drain_session(&self, entries: Vec<OutboxEntry>) {
        for entry in entries {
            self.drain_one(entry).await;
        }
    }

    async fn drain_one(&self, entry: OutboxEntry) {
        let document = ColdDocument {
            blob: entry.blob.clone(),
            meta: RecordMeta {
                version: entry.version,
                fencing_token: entry.fencing_token,
                updated_at: chrono::Utc::now(),
                expires_at: chrono::Utc::now() + chrono::Duration::seconds(self.record_ttl.as_secs() as i64),
            },
        };

        let expected_version = entry.version.saturating_sub(1);
        let started = std::time::Instant::now();
        let put_result = self.cold.conditional_put(&entry.session, document, expected_version).await;
        crate::metrics::record_reconciler_latency(started.elapsed().as_secs_f64());

        match put_result {
            Ok(result) if result.applied => {
                self.breaker.record_success();
                self.outbox.complete(&entry.session, entry.id).await;
                let _ = self.hot.touch(&entry.session, self.record_ttl).await;
            }
            Ok(result) => {
                // Lost the race or a stale expectation; only re-raise if cold hasn't
                // already caught up to this entry's version.
                let already_applied = result
                    .current
                    .as_ref()
                    .map(|current| current.meta.version >= entry.version)
                    .unwrap_or(false);
                if already_applied {
                    self.outbox.complete(&entry.session, entry.id).await;
                } else {
                    self.outbox
                        .fail(&entry.session, entry.id, "version conflict".into(), self.config.max_attempts)
                        .await;
                }
            }
            Err(err) => {
                if matches!(err, crate::error::EngineError::CircuitOpen) {
                    self.breaker.record_failure();
                } else if err.is_transient() {
                    self.breaker.record_failure();
                }
                log::warn!(
                    "reconciler: session={} version={} failed: {err}",
                    entry.session,
                    entry.version
                );
                crate::metrics::record_reconciler_failure();
                self.outbox
                    .fail(&entry.session, entry.id, err.to_string(), self.config.max_attempts)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cold_store::MemoryColdStore;
    use crate::hot_store::MemoryHotStore;
    use crate::model::SessionId;

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconcilerConfig {
            base_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(500),
            ..ReconcilerConfig::default()
        };
        for attempt in 0..10 {
            let delay = backoff_delay(&config, attempt);
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn drains_pending_entry_to_cold_store() {
        let outbox = Arc::new(Outbox::new());
        let hot = Arc::new(MemoryHotStore::new());
        let cold = Arc::new(MemoryColdStore::new());
        let breaker = Arc::new(CircuitBreaker::new(Default::default()));

        let session = SessionId::new("s1").unwrap();
        outbox.enqueue(session.clone(), 1, vec![9, 9], None, false).await;

        let reconciler = Arc::new(Reconciler::new(
            outbox.clone(),
            hot,
            cold.clone(),
            breaker,
            ReconcilerConfig::default(),
            Duration::from_secs(60),
        ));

        let batch = outbox.claim(10).await;
        reconciler.drain_session(batch).await;

        let stored = cold.get(&session).await.unwrap().unwrap();
        assert_eq!(stored.blob, vec![9, 9]);
        assert_eq!(outbox.stats().await.pending, 0);
    }
}
