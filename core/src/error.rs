//! Crate-wide error taxonomy.
//!
//! Every public entry point returns [`EngineResult<T>`]. Internal helpers are free to
//! propagate backend-specific errors (`redis::RedisError`, `mongodb::error::Error`, ...)
//! but must map them into [`EngineError`] at the module boundary — callers should never
//! see a backend type leak through this crate's API.

use std::fmt;

use crate::model::SessionId;

pub type EngineResult<T> = Result<T, EngineError>;

/// Which tier an operation failed against, for [`EngineError::Storage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Cold,
    Outbox,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Cold => write!(f, "cold"),
            Tier::Outbox => write!(f, "outbox"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("version mismatch for session {session}: expected {expected}, actual {actual}")]
    VersionMismatch {
        session: SessionId,
        expected: u64,
        actual: u64,
    },

    #[error("fencing token stale for session {session}: supplied {supplied}, recorded {recorded}")]
    FencingTokenStale {
        session: SessionId,
        supplied: u64,
        recorded: u64,
    },

    #[error("operation on session {session:?} timed out after {elapsed_ms}ms")]
    Timeout {
        session: Option<SessionId>,
        elapsed_ms: u64,
    },

    #[error("circuit breaker is open, cold tier calls are short-circuited")]
    CircuitOpen,

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("compression error: {0}")]
    CompressionError(String),

    #[error("{tier} storage error: {source}")]
    Storage {
        tier: Tier,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn storage(
        tier: Tier,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        EngineError::Storage {
            tier,
            source: Box::new(source),
        }
    }

    /// Transient failures are worth retrying locally and count against the circuit breaker;
    /// logical conflicts (`VersionMismatch`, `FencingTokenStale`) never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::Storage { .. } | EngineError::CircuitOpen
        )
    }
}
