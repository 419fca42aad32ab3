//! End-to-end scenarios against the in-memory reference backends. No external services
//! are required; `MemoryHotStore`/`MemoryColdStore` stand in for Redis/MongoDB.

use std::sync::Arc;
use std::time::Duration;

use authstore_core::circuit_breaker::CircuitBreaker;
use authstore_core::codec::encryption::Keyring;
use authstore_core::codec::SnapshotCodec;
use authstore_core::cold_store::{ColdStore, MemoryColdStore};
use authstore_core::config::{EngineConfig, RateLimitConfig, SecurityConfig};
use authstore_core::engine::HybridEngine;
use authstore_core::error::EngineError;
use authstore_core::hot_store::MemoryHotStore;
use authstore_core::model::{KeyType, Patch, SessionId};
use authstore_core::outbox::Outbox;
use authstore_core::rate_limiter::{Decision, RateLimiter};
use serde_json::json;

type TestEngine = HybridEngine<MemoryHotStore, MemoryColdStore>;

fn build_engine() -> (TestEngine, Arc<MemoryColdStore>, Arc<Outbox>, Arc<CircuitBreaker>) {
    let security = SecurityConfig { enable_encryption: false, enable_compression: false, ..Default::default() };
    let codec = Arc::new(SnapshotCodec::new(security, Keyring::new("k1", [4u8; 32])));
    let cold = Arc::new(MemoryColdStore::new());
    let outbox = Arc::new(Outbox::new());
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let mut config = EngineConfig::default();
    config.write_behind.enable_write_behind = false;

    let engine = HybridEngine::new(
        Arc::new(MemoryHotStore::new()),
        cold.clone(),
        codec,
        breaker.clone(),
        outbox.clone(),
        config,
    )
    .unwrap();
    (engine, cold, outbox, breaker)
}

#[tokio::test]
async fn s1_create_read_delete() {
    let (engine, ..) = build_engine();
    let session = SessionId::new("s1").unwrap();

    assert!(engine.get(&session).await.unwrap().is_none());

    let patch = Patch { creds: Some(json!({"registrationId": 12345})), ..Default::default() };
    let result = engine.set(&session, patch, None, None).await.unwrap();
    assert_eq!(result.version, 1);

    let got = engine.get(&session).await.unwrap().unwrap();
    assert_eq!(got.version, 1);
    assert_eq!(got.data.creds, json!({"registrationId": 12345}));

    engine.delete(&session).await.unwrap();
    assert!(engine.get(&session).await.unwrap().is_none());
}

#[tokio::test]
async fn s2_optimistic_concurrency_exactly_one_writer_wins() {
    let (engine, ..) = build_engine();
    let session = SessionId::new("s2").unwrap();
    engine.set(&session, Patch::default(), None, None).await.unwrap();

    let engine = Arc::new(engine);
    let a = {
        let engine = engine.clone();
        let session = session.clone();
        tokio::spawn(async move {
            engine
                .set(&session, Patch { creds: Some(json!("a")), ..Default::default() }, Some(1), None)
                .await
        })
    };
    let b = {
        let engine = engine.clone();
        let session = session.clone();
        tokio::spawn(async move {
            engine
                .set(&session, Patch { creds: Some(json!("b")), ..Default::default() }, Some(1), None)
                .await
        })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    let outcomes = [a, b];
    let successes = outcomes.iter().filter(|r| matches!(r, Ok(v) if v.version == 2)).count();
    let mismatches = outcomes
        .iter()
        .filter(|r| matches!(r, Err(EngineError::VersionMismatch { expected: 1, actual: 2, .. })))
        .count();

    assert_eq!(successes, 1, "exactly one writer should win the race");
    assert_eq!(mismatches, 1, "the loser should see VersionMismatch(expected:1, actual:2)");

    let current = engine.get(&session).await.unwrap().unwrap();
    assert_eq!(current.version, 2);
}

#[tokio::test]
async fn s3_partial_key_update_merges_then_deletes() {
    let (engine, ..) = build_engine();
    let session = SessionId::new("s3").unwrap();

    let mut seed = Patch::default();
    seed.keys.insert(
        KeyType::PreKey,
        [("1".to_string(), Some(json!("A"))), ("2".to_string(), Some(json!("B")))].into(),
    );
    engine.set(&session, seed, None, None).await.unwrap();

    let mut update = Patch::default();
    update.keys.insert(
        KeyType::PreKey,
        [("1".to_string(), Some(json!("A'"))), ("3".to_string(), Some(json!("C")))].into(),
    );
    engine.set(&session, update, None, None).await.unwrap();

    let snapshot = engine.get(&session).await.unwrap().unwrap().data;
    let bucket = &snapshot.keys[&KeyType::PreKey];
    assert_eq!(bucket.get("1"), Some(&json!("A'")));
    assert_eq!(bucket.get("2"), Some(&json!("B")));
    assert_eq!(bucket.get("3"), Some(&json!("C")));

    let mut delete = Patch::default();
    delete.keys.insert(KeyType::PreKey, [("2".to_string(), None)].into());
    engine.set(&session, delete, None, None).await.unwrap();

    let snapshot = engine.get(&session).await.unwrap().unwrap().data;
    let bucket = &snapshot.keys[&KeyType::PreKey];
    assert_eq!(bucket.len(), 2);
    assert!(!bucket.contains_key("2"));
}

#[tokio::test]
async fn s4_cold_outage_then_reconciler_convergence() {
    use authstore_core::reconciler::{Reconciler, ReconcilerConfig};

    let security = SecurityConfig { enable_encryption: false, enable_compression: false, ..Default::default() };
    let codec = Arc::new(SnapshotCodec::new(security, Keyring::new("k1", [4u8; 32])));
    let cold = Arc::new(MemoryColdStore::new());
    let outbox = Arc::new(Outbox::new());
    let breaker = Arc::new(CircuitBreaker::new(Default::default()));
    let hot = Arc::new(MemoryHotStore::new());

    let mut config = EngineConfig::default();
    config.write_behind.enable_write_behind = true;

    let engine = HybridEngine::new(hot.clone(), cold.clone(), codec, breaker.clone(), outbox.clone(), config).unwrap();
    let session = SessionId::new("s4").unwrap();

    for i in 0..5u64 {
        let patch = Patch { creds: Some(json!({"seq": i})), ..Default::default() };
        let result = engine.set(&session, patch, None, None).await.unwrap();
        assert_eq!(result.version, i + 1);
    }

    let hot_version = engine.get(&session).await.unwrap().unwrap().version;
    assert_eq!(hot_version, 5);
    assert!(cold.get(&session).await.unwrap().is_none(), "cold tier should still be empty before reconciliation");

    let reconciler = Arc::new(Reconciler::new(
        outbox.clone(),
        hot,
        cold.clone(),
        breaker,
        ReconcilerConfig { poll_interval: Duration::from_millis(10), ..ReconcilerConfig::default() },
        Duration::from_secs(3600),
    ));
    let (handle, cancel) = reconciler.spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if outbox.stats().await.pending == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "reconciler did not converge in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let document = cold.get(&session).await.unwrap().unwrap();
    assert_eq!(document.meta.version, 5);

    cancel.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn s5_fencing_token_rejects_stale_writes() {
    let (engine, ..) = build_engine();
    let session = SessionId::new("s5").unwrap();

    engine.set(&session, Patch::default(), None, Some(100)).await.unwrap();

    let err = engine.set(&session, Patch::default(), None, Some(99)).await.unwrap_err();
    assert!(matches!(err, EngineError::FencingTokenStale { supplied: 99, recorded: 100, .. }));

    let result = engine.set(&session, Patch::default(), None, Some(101)).await.unwrap();
    assert_eq!(result.version, 2);

    let err = engine.set(&session, Patch::default(), None, Some(50)).await.unwrap_err();
    assert!(matches!(err, EngineError::FencingTokenStale { supplied: 50, recorded: 101, .. }));
}

#[test]
fn s6_rate_limiter_warmup_ramp() {
    let limiter = RateLimiter::new(RateLimitConfig {
        enabled: true,
        max_messages_per_minute: 12,
        cold_contact_multiplier: 1.0,
        jitter_range_ms: (0, 0),
        warmup_period_days: 10,
    });
    let session = SessionId::new("s6").unwrap();

    let mut allowed = 0;
    for _ in 0..20 {
        if limiter.try_acquire(&session, 1) == Decision::Allow {
            allowed += 1;
        } else {
            break;
        }
    }
    assert!((2..=4).contains(&allowed), "expected ~3 tokens at t=0, got {allowed}");
}
