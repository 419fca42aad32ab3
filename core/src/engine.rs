//! The orchestrator. Coordinates [`crate::hot_store`], [`crate::cold_store`],
//! [`crate::codec::SnapshotCodec`], [`crate::circuit_breaker::CircuitBreaker`] and
//! [`crate::outbox::Outbox`] into read-through, write-behind, optimistically-versioned
//! session storage.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;

use crate::circuit_breaker::CircuitBreaker;
use crate::cold_store::ColdStore;
use crate::codec::SnapshotCodec;
use crate::config::{EngineConfig, ResilienceConfig};
use crate::error::{EngineError, EngineResult};
use crate::hot_store::{HotRecord, HotStore};
use crate::model::{Patch, RecordMeta, SessionId, Snapshot, Versioned, VersionedResult};
use crate::outbox::Outbox;

/// `base * multiplier^attempt` with full jitter, the same shape as
/// [`crate::reconciler::backoff_delay`] but scoped to a single synchronous call's retry
/// budget rather than the reconciler's unbounded redrive loop.
fn retry_backoff(config: &ResilienceConfig, attempt: u32) -> Duration {
    let exp = config.retry_multiplier.powi(attempt as i32);
    let delay_ms = config.retry_base_delay.as_millis() as f64 * exp;
    let jittered_ms = rand::thread_rng().gen_range(0.0..=delay_ms.max(1.0));
    Duration::from_millis(jittered_ms as u64)
}

/// Lazily-created, LRU-evicted per-session locks. Used both for the write-path mutex
/// table and the cold-read coalescing gate, each with its own instance.
fn new_lock_table(ttl: Duration) -> Cache<SessionId, Arc<AsyncMutex<()>>> {
    Cache::builder().time_to_idle(ttl).max_capacity(1_000_000).build()
}

fn lock_for(table: &Cache<SessionId, Arc<AsyncMutex<()>>>, session: &SessionId) -> Arc<AsyncMutex<()>> {
    table.get_with(session.clone(), || Arc::new(AsyncMutex::new(())))
}

pub struct HybridEngine<H: HotStore, C: ColdStore> {
    hot: Arc<H>,
    cold: Arc<C>,
    codec: Arc<SnapshotCodec>,
    breaker: Arc<CircuitBreaker>,
    outbox: Arc<Outbox>,
    config: EngineConfig,
    write_locks: Cache<SessionId, Arc<AsyncMutex<()>>>,
    cold_read_gate: Cache<SessionId, Arc<AsyncMutex<()>>>,
}

impl<H: HotStore + 'static, C: ColdStore + 'static> HybridEngine<H, C> {
    pub fn new(
        hot: Arc<H>,
        cold: Arc<C>,
        codec: Arc<SnapshotCodec>,
        breaker: Arc<CircuitBreaker>,
        outbox: Arc<Outbox>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let lock_ttl = Duration::from_secs(config.ttl.lock_ttl_secs);
        Ok(HybridEngine {
            hot,
            cold,
            codec,
            breaker,
            outbox,
            config,
            write_locks: new_lock_table(lock_ttl),
            cold_read_gate: new_lock_table(lock_ttl),
        })
    }

    fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl.default_ttl_secs)
    }

    /// Runs `op` under `resilience.operation_timeout`, retrying transient failures
    /// (`EngineError::is_transient`) up to `resilience.max_retries` times with
    /// exponential backoff and full jitter. Logical conflicts (`VersionMismatch`,
    /// `FencingTokenStale`) are never transient and return on the first attempt.
    async fn with_resilience<T, Fut>(
        &self,
        session: &SessionId,
        mut op: impl FnMut() -> Fut,
    ) -> EngineResult<T>
    where
        Fut: Future<Output = EngineResult<T>>,
    {
        let resilience = &self.config.resilience;
        let mut attempt = 0u32;
        loop {
            let started = std::time::Instant::now();
            match tokio::time::timeout(resilience.operation_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if !err.is_transient() => return Err(err),
                Ok(Err(err)) => {
                    if attempt >= resilience.max_retries {
                        return Err(err);
                    }
                }
                Err(_elapsed) => {
                    if attempt >= resilience.max_retries {
                        return Err(EngineError::Timeout {
                            session: Some(session.clone()),
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
            tokio::time::sleep(retry_backoff(resilience, attempt)).await;
            attempt += 1;
        }
    }

    /// Read-through: hot tier first, then cold tier on miss (coalesced per session, and
    /// short-circuited entirely while the breaker is open).
    pub async fn get(&self, session: &SessionId) -> EngineResult<Option<Versioned<Snapshot>>> {
        let start = std::time::Instant::now();

        if let Some(record) = self.with_resilience(session, || self.hot.get(session)).await? {
            let snapshot = self.codec.decode(&record.blob)?;
            crate::metrics::record_get(true, false, start.elapsed().as_secs_f64());
            return Ok(Some(Versioned {
                data: snapshot,
                version: record.meta.version,
                updated_at: record.meta.updated_at,
            }));
        }

        if self.breaker.is_open() {
            crate::metrics::record_get(false, true, start.elapsed().as_secs_f64());
            return Ok(None);
        }

        let gate = lock_for(&self.cold_read_gate, session);
        let _permit = gate.lock().await;

        // Another waiter may have already populated the hot tier while we queued for
        // the gate; recheck before paying for a cold read.
        if let Some(record) = self.with_resilience(session, || self.hot.get(session)).await? {
            let snapshot = self.codec.decode(&record.blob)?;
            crate::metrics::record_get(true, false, start.elapsed().as_secs_f64());
            return Ok(Some(Versioned {
                data: snapshot,
                version: record.meta.version,
                updated_at: record.meta.updated_at,
            }));
        }

        let cold_result = self.with_resilience(session, || self.cold.get(session)).await;
        match cold_result {
            Ok(Some(document)) => {
                self.breaker.record_success();
                let snapshot = self.codec.decode(&document.blob)?;
                self.with_resilience(session, || {
                    self.hot.set(
                        session,
                        HotRecord { blob: document.blob.clone(), meta: document.meta.clone() },
                        self.snapshot_ttl(),
                    )
                })
                .await?;
                crate::metrics::record_get(false, false, start.elapsed().as_secs_f64());
                Ok(Some(Versioned {
                    data: snapshot,
                    version: document.meta.version,
                    updated_at: document.meta.updated_at,
                }))
            }
            Ok(None) => {
                self.breaker.record_success();
                crate::metrics::record_get(false, false, start.elapsed().as_secs_f64());
                Ok(None)
            }
            Err(err) => {
                if err.is_transient() {
                    self.breaker.record_failure();
                }
                Err(err)
            }
        }
    }

    /// Coordinated write: loads the current version (hot, falling back to cold),
    /// enforces `expectedVersion`/`fencingToken`, merges the patch, commits to the hot
    /// tier synchronously and the cold tier via the outbox (or synchronously, if
    /// write-behind is disabled).
    pub async fn set(
        &self,
        session: &SessionId,
        patch: Patch,
        expected_version: Option<u64>,
        fencing_token: Option<u64>,
    ) -> EngineResult<VersionedResult> {
        let start = std::time::Instant::now();
        let lock = lock_for(&self.write_locks, session);
        let _guard = lock.lock().await;

        let current = self.load_current(session).await?;
        let (mut snapshot, current_version, current_fencing) = match current {
            Some((snapshot, meta)) => (snapshot, meta.version, meta.fencing_token),
            None => (Snapshot::default(), 0, None),
        };

        if let Some(expected) = expected_version {
            if expected != current_version {
                crate::metrics::record_set(start.elapsed().as_secs_f64());
                return Err(EngineError::VersionMismatch {
                    session: session.clone(),
                    expected,
                    actual: current_version,
                });
            }
        }

        if let Some(supplied) = fencing_token {
            if let Some(recorded) = current_fencing {
                if supplied < recorded {
                    crate::metrics::record_set(start.elapsed().as_secs_f64());
                    return Err(EngineError::FencingTokenStale {
                        session: session.clone(),
                        supplied,
                        recorded,
                    });
                }
            }
        }

        snapshot.apply(patch);
        let new_version = current_version + 1;
        let updated_at = chrono::Utc::now();
        let blob = self.codec.encode(&snapshot)?;

        let meta = RecordMeta {
            version: new_version,
            fencing_token: fencing_token.or(current_fencing),
            updated_at,
            expires_at: updated_at + chrono::Duration::seconds(self.config.ttl.default_ttl_secs as i64),
        };

        self.with_resilience(session, || {
            self.hot.set(session, HotRecord { blob: blob.clone(), meta: meta.clone() }, self.snapshot_ttl())
        })
        .await?;

        // Backlog at or above the configured queue size degrades to a synchronous
        // cold-tier write instead of enqueueing further, so a stalled reconciler can't
        // grow the outbox without bound; enqueueing resumes once the backlog drains.
        let backlogged = self.config.write_behind.enable_write_behind
            && self.outbox.session_pending_count(session).await >= self.config.write_behind.queue_size;

        if !self.config.write_behind.enable_write_behind || backlogged {
            let put_result = self
                .with_resilience(session, || {
                    let document = crate::cold_store::ColdDocument { blob: blob.clone(), meta: meta.clone() };
                    self.cold.conditional_put(session, document, current_version)
                })
                .await;

            match put_result {
                Ok(result) if result.applied => {
                    crate::metrics::record_direct_write();
                }
                Ok(result) => {
                    crate::metrics::record_set(start.elapsed().as_secs_f64());
                    let actual = result.current.map(|c| c.meta.version).unwrap_or(current_version);
                    return Err(EngineError::VersionMismatch {
                        session: session.clone(),
                        expected: current_version,
                        actual,
                    });
                }
                // The hot tier is already committed. Per write-behind config, a transient
                // cold-store failure on a synchronous write falls back onto the outbox
                // for the reconciler rather than failing a call whose hot write already
                // succeeded — unless the caller has opted into strict failure.
                Err(err) if err.is_transient() && !self.config.write_behind.fail_on_sync_cold_error => {
                    log::warn!(
                        "set: session={session} synchronous cold write failed ({err}), falling back to the outbox"
                    );
                    self.outbox
                        .enqueue(session.clone(), new_version, blob, meta.fencing_token, false)
                        .await;
                }
                Err(err) => {
                    crate::metrics::record_queue_failure();
                    crate::metrics::record_set(start.elapsed().as_secs_f64());
                    return Err(err);
                }
            }
        } else {
            self.outbox
                .enqueue(session.clone(), new_version, blob, meta.fencing_token, false)
                .await;
        }

        crate::metrics::record_set(start.elapsed().as_secs_f64());
        Ok(VersionedResult { version: new_version, updated_at, success: true })
    }

    pub async fn delete(&self, session: &SessionId) -> EngineResult<()> {
        let lock = lock_for(&self.write_locks, session);
        let _guard = lock.lock().await;

        let current_version = self.load_current(session).await?.map(|(_, meta)| meta.version).unwrap_or(0);
        self.hot.delete(session).await?;
        self.outbox
            .enqueue(session.clone(), current_version + 1, Vec::new(), None, true)
            .await;
        Ok(())
    }

    pub async fn touch(&self, session: &SessionId, ttl: Option<Duration>) -> EngineResult<bool> {
        let ttl = ttl.unwrap_or_else(|| self.snapshot_ttl());
        self.hot.touch(session, ttl).await
    }

    pub async fn exists(&self, session: &SessionId) -> EngineResult<bool> {
        if self.hot.exists(session).await? {
            return Ok(true);
        }
        if self.breaker.is_open() {
            return Ok(false);
        }
        Ok(self.cold.get(session).await?.is_some())
    }

    /// Hot-tier connectivity is required unconditionally. Cold-tier connectivity is only
    /// consulted while the breaker is closed — an open breaker already means the cold
    /// tier is known bad, so it counts as unhealthy without paying for another ping.
    pub async fn is_healthy(&self) -> bool {
        if self.hot.ping().await.is_err() {
            return false;
        }
        if self.breaker.is_open() {
            return false;
        }
        self.cold.ping().await.is_ok()
    }

    pub async fn disconnect(&self) {
        // Both backends manage their own connection lifecycles (ConnectionManager for
        // Redis, the driver's internal pool for Mongo); nothing to release here beyond
        // letting the Arcs drop.
    }

    /// Loads the current snapshot and its metadata for the write path: hot tier first,
    /// falling back to cold (subject to the breaker) since a write must see the latest
    /// committed state even if it hasn't been touched recently enough to still be hot.
    async fn load_current(
        &self,
        session: &SessionId,
    ) -> EngineResult<Option<(Snapshot, RecordMeta)>> {
        if let Some(record) = self.with_resilience(session, || self.hot.get(session)).await? {
            let snapshot = self.codec.decode(&record.blob)?;
            return Ok(Some((snapshot, record.meta)));
        }

        if self.breaker.is_open() {
            return Ok(None);
        }

        match self.with_resilience(session, || self.cold.get(session)).await {
            Ok(Some(document)) => {
                self.breaker.record_success();
                let snapshot = self.codec.decode(&document.blob)?;
                Ok(Some((snapshot, document.meta)))
            }
            Ok(None) => {
                self.breaker.record_success();
                Ok(None)
            }
            Err(err) => {
                if err.is_transient() {
                    self.breaker.record_failure();
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cold_store::MemoryColdStore;
    use crate::codec::encryption::Keyring;
    use crate::config::SecurityConfig;
    use crate::hot_store::MemoryHotStore;
    use serde_json::json;

    fn make_engine() -> HybridEngine<MemoryHotStore, MemoryColdStore> {
        let security = SecurityConfig { enable_encryption: false, enable_compression: false, ..SecurityConfig::default() };
        let codec = Arc::new(SnapshotCodec::new(security, Keyring::new("k1", [1u8; 32])));
        HybridEngine::new(
            Arc::new(MemoryHotStore::new()),
            Arc::new(MemoryColdStore::new()),
            codec,
            Arc::new(CircuitBreaker::new(Default::default())),
            Arc::new(Outbox::new()),
            EngineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_hot_tier() {
        let engine = make_engine();
        let session = SessionId::new("s1").unwrap();
        let patch = Patch { creds: Some(json!({"a": 1})), ..Default::default() };

        let result = engine.set(&session, patch, None, None).await.unwrap();
        assert_eq!(result.version, 1);

        let got = engine.get(&session).await.unwrap().unwrap();
        assert_eq!(got.version, 1);
        assert_eq!(got.data.creds, json!({"a": 1}));
    }

    #[tokio::test]
    async fn expected_version_mismatch_is_rejected() {
        let engine = make_engine();
        let session = SessionId::new("s1").unwrap();
        engine.set(&session, Patch::default(), None, None).await.unwrap();

        let err = engine.set(&session, Patch::default(), Some(99), None).await.unwrap_err();
        assert!(matches!(err, EngineError::VersionMismatch { expected: 99, actual: 1, .. }));
    }

    #[tokio::test]
    async fn stale_fencing_token_is_rejected() {
        let engine = make_engine();
        let session = SessionId::new("s1").unwrap();
        engine.set(&session, Patch::default(), None, Some(5)).await.unwrap();

        let err = engine.set(&session, Patch::default(), None, Some(2)).await.unwrap_err();
        assert!(matches!(err, EngineError::FencingTokenStale { supplied: 2, recorded: 5, .. }));
    }

    #[tokio::test]
    async fn delete_removes_from_hot_tier() {
        let engine = make_engine();
        let session = SessionId::new("s1").unwrap();
        engine.set(&session, Patch::default(), None, None).await.unwrap();
        engine.delete(&session).await.unwrap();

        assert!(engine.get(&session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exists_is_false_for_untouched_session() {
        let engine = make_engine();
        let session = SessionId::new("nope").unwrap();
        assert!(!engine.exists(&session).await.unwrap());
    }

    /// A [`crate::cold_store::ColdStore`] wrapping [`MemoryColdStore`] whose
    /// `conditional_put` fails with a transient storage error until told to stop,
    /// for exercising the resilience retry path and the write-behind fallback.
    struct FlakyColdStore {
        inner: MemoryColdStore,
        always_fail: bool,
    }

    impl FlakyColdStore {
        fn new(always_fail: bool) -> Self {
            FlakyColdStore { inner: MemoryColdStore::new(), always_fail }
        }
    }

    #[async_trait::async_trait]
    impl ColdStore for FlakyColdStore {
        async fn get(&self, session: &SessionId) -> EngineResult<Option<crate::cold_store::ColdDocument>> {
            self.inner.get(session).await
        }

        async fn conditional_put(
            &self,
            session: &SessionId,
            document: crate::cold_store::ColdDocument,
            expected_version: u64,
        ) -> EngineResult<crate::cold_store::ConditionalPutResult> {
            if self.always_fail {
                return Err(EngineError::storage(
                    crate::error::Tier::Cold,
                    std::io::Error::new(std::io::ErrorKind::Other, "flaky cold store"),
                ));
            }
            self.inner.conditional_put(session, document, expected_version).await
        }

        async fn delete(&self, session: &SessionId) -> EngineResult<()> {
            self.inner.delete(session).await
        }

        async fn ping(&self) -> EngineResult<()> {
            self.inner.ping().await
        }
    }

    fn make_engine_with_cold(
        cold: FlakyColdStore,
        config: EngineConfig,
    ) -> HybridEngine<MemoryHotStore, FlakyColdStore> {
        let security = SecurityConfig { enable_encryption: false, enable_compression: false, ..SecurityConfig::default() };
        let codec = Arc::new(SnapshotCodec::new(security, Keyring::new("k1", [1u8; 32])));
        HybridEngine::new(
            Arc::new(MemoryHotStore::new()),
            Arc::new(cold),
            codec,
            Arc::new(CircuitBreaker::new(Default::default())),
            Arc::new(Outbox::new()),
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transient_cold_failure_falls_back_to_outbox_by_default() {
        let mut config = EngineConfig::default();
        config.write_behind.enable_write_behind = false;
        config.resilience.max_retries = 1;
        config.resilience.retry_base_delay = Duration::from_millis(1);

        let engine = make_engine_with_cold(FlakyColdStore::new(true), config);
        let session = SessionId::new("s1").unwrap();

        let result = engine.set(&session, Patch::default(), None, None).await.unwrap();
        assert_eq!(result.version, 1);

        let got = engine.get(&session).await.unwrap().unwrap();
        assert_eq!(got.version, 1);
    }

    #[tokio::test]
    async fn transient_cold_failure_surfaces_when_strict_mode_enabled() {
        let mut config = EngineConfig::default();
        config.write_behind.enable_write_behind = false;
        config.write_behind.fail_on_sync_cold_error = true;
        config.resilience.max_retries = 1;
        config.resilience.retry_base_delay = Duration::from_millis(1);

        let engine = make_engine_with_cold(FlakyColdStore::new(true), config);
        let session = SessionId::new("s1").unwrap();

        let err = engine.set(&session, Patch::default(), None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage { .. }));
    }
}
