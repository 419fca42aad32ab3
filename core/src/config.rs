//! Engine configuration. Plain constructor-supplied structs — this crate never
//! reads environment variables or files itself; that wiring belongs to the embedding
//! binary, which is out of scope here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    Secretbox,
    Aes256Gcm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    Snappy,
    Gzip,
    Lz4,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TtlConfig {
    pub default_ttl_secs: u64,
    pub creds_ttl_secs: u64,
    pub keys_ttl_secs: u64,
    pub lock_ttl_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        TtlConfig {
            default_ttl_secs: 60 * 60 * 24 * 30,
            creds_ttl_secs: 60 * 60 * 24 * 30,
            keys_ttl_secs: 60 * 60 * 24 * 30,
            lock_ttl_secs: 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_multiplier: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        ResilienceConfig {
            operation_timeout: Duration::from_millis(2_000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_multiplier: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_encryption: bool,
    pub encryption_algorithm: EncryptionAlgorithm,
    pub key_rotation_days: u32,
    pub enable_compression: bool,
    pub compression_algorithm: CompressionAlgorithm,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            enable_encryption: true,
            encryption_algorithm: EncryptionAlgorithm::Aes256Gcm,
            key_rotation_days: 7,
            enable_compression: true,
            compression_algorithm: CompressionAlgorithm::Snappy,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub enable_metrics: bool,
    pub enable_tracing: bool,
    pub enable_detailed_logs: bool,
    pub metrics_interval: Duration,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        ObservabilityConfig {
            enable_metrics: true,
            enable_tracing: false,
            enable_detailed_logs: false,
            metrics_interval: Duration::from_millis(10_000),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteBehindConfig {
    pub enable_write_behind: bool,
    pub flush_interval: Duration,
    pub queue_size: usize,
    /// Governs what happens when a *synchronous* cold write (write-behind disabled, or
    /// a session's outbox is backlogged past `queue_size`) fails with a transient
    /// storage error: the hot tier has already been committed by that point. When
    /// `false` (the default), the call still returns success and the entry falls back
    /// onto the outbox for the reconciler to pick up. When `true`, the call instead
    /// surfaces the storage error to the caller.
    pub fail_on_sync_cold_error: bool,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        WriteBehindConfig {
            enable_write_behind: true,
            flush_interval: Duration::from_millis(500),
            queue_size: 1_000,
            fail_on_sync_cold_error: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_messages_per_minute: u32,
    pub cold_contact_multiplier: f64,
    pub jitter_range_ms: (u64, u64),
    pub warmup_period_days: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: true,
            max_messages_per_minute: 60,
            cold_contact_multiplier: 0.33,
            jitter_range_ms: (0, 250),
            warmup_period_days: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub rotation_threshold_per_minute: u32,
    pub silence_threshold_ms: u64,
    pub disconnect_threshold_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            enabled: true,
            rotation_threshold_per_minute: 30,
            silence_threshold_ms: 30_000,
            disconnect_threshold_ms: 120_000,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ttl: TtlConfig,
    pub resilience: ResilienceConfig,
    pub security: SecurityConfig,
    pub observability: ObservabilityConfig,
    pub write_behind: WriteBehindConfig,
    pub rate_limit: RateLimitConfig,
    pub monitoring: MonitoringConfig,
}

impl EngineConfig {
    /// Rejects out-of-range values at construction time rather than failing lazily
    /// mid-operation.
    pub fn validate(&self) -> EngineResult<()> {
        let err = |msg: &str| Err(EngineError::ValidationError(msg.to_string()));

        if self.ttl.default_ttl_secs == 0
            || self.ttl.creds_ttl_secs == 0
            || self.ttl.keys_ttl_secs == 0
            || self.ttl.lock_ttl_secs == 0
        {
            return err("ttl values must be >= 1 second");
        }
        if self.resilience.operation_timeout < Duration::from_millis(100) {
            return err("resilience.operation_timeout must be >= 100ms");
        }
        if self.resilience.max_retries > 10 {
            return err("resilience.max_retries must be <= 10");
        }
        if self.resilience.retry_multiplier < 1.0 {
            return err("resilience.retry_multiplier must be >= 1.0");
        }
        if self.security.enable_encryption && self.security.key_rotation_days == 0 {
            return err("security.key_rotation_days must be >= 1 when encryption is enabled");
        }
        if self.observability.metrics_interval < Duration::from_millis(1_000) {
            return err("observability.metrics_interval must be >= 1000ms");
        }
        if self.rate_limit.jitter_range_ms.0 > self.rate_limit.jitter_range_ms.1 {
            return err("rate_limit.jitter_range_ms must have min <= max");
        }
        Ok(())
    }
}
