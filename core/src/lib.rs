//! A hybrid hot/cold store for durable, versioned, multi-tenant session and credential
//! state. A low-latency hot tier (in-memory or Redis) serves reads and absorbs writes
//! immediately; a durable cold tier (in-memory or MongoDB) holds the source of truth and
//! is kept in sync by a write-behind outbox and reconciler. A circuit breaker gates the
//! cold tier so a degraded durable store never drags down the hot path; a per-session
//! rate limiter and connection tracker feed a diagnostic engine that reports aggregate
//! session health.
//!
//! ## Getting started
//!
//! ```rust
//! use std::sync::Arc;
//! use authstore_core::circuit_breaker::CircuitBreaker;
//! use authstore_core::codec::encryption::Keyring;
//! use authstore_core::codec::SnapshotCodec;
//! use authstore_core::cold_store::MemoryColdStore;
//! use authstore_core::config::{EngineConfig, SecurityConfig};
//! use authstore_core::engine::HybridEngine;
//! use authstore_core::hot_store::MemoryHotStore;
//! use authstore_core::model::{Patch, SessionId};
//! use authstore_core::outbox::Outbox;
//!
//! # async fn run() -> Result<(), authstore_core::error::EngineError> {
//! let security = SecurityConfig { enable_encryption: false, enable_compression: false, ..Default::default() };
//! let codec = Arc::new(SnapshotCodec::new(security, Keyring::new("k1", [7u8; 32])));
//!
//! let engine = HybridEngine::new(
//!     Arc::new(MemoryHotStore::new()),
//!     Arc::new(MemoryColdStore::new()),
//!     codec,
//!     Arc::new(CircuitBreaker::new(Default::default())),
//!     Arc::new(Outbox::new()),
//!     EngineConfig::default(),
//! )?;
//!
//! let session = SessionId::new("alice.1")?;
//! engine.set(&session, Patch::default(), None, None).await?;
//! let current = engine.get(&session).await?;
//! assert!(current.is_some());
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod codec;
pub mod cold_store;
pub mod config;
pub mod connection_tracker;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod hot_store;
pub mod metrics;
pub mod model;
pub mod outbox;
pub mod rate_limiter;
pub mod reconciler;
