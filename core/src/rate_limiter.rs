//! Per-session token-bucket rate limiting with a warmup ramp (new sessions start
//! constrained and ease up to the full rate) and a cold-contact multiplier (sessions
//! that have gone quiet get a reduced budget once they resume).

use std::time::{Duration, Instant};

use moka::sync::Cache;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::RateLimitConfig;
use crate::model::SessionId;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    first_seen: Instant,
    last_contact: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Throttle,
}

/// Buckets live in a `moka` LRU+TTL cache rather than growing unboundedly with every
/// session ever seen — an idle session's bucket simply expires and a fresh one (at the
/// warmup floor) is created on its next request.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Cache<SessionId, std::sync::Arc<Mutex<Bucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let buckets = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(60 * 60 * 24))
            .build();
        RateLimiter { config, buckets }
    }

    /// `warmup_fraction` is how far into the warmup period this session is (0.0 at
    /// first contact, 1.0 once `warmup_period_days` have elapsed), ramping the
    /// effective rate linearly from the cold-contact floor up to the full configured
    /// rate.
    pub fn try_acquire(&self, session: &SessionId, tokens: u32) -> Decision {
        self.acquire_inner(session, tokens.max(1) as f64, true)
    }

    /// Reports whether a single token is currently available without consuming it —
    /// for health checks that must not perturb a session's live rate-limit budget.
    pub fn status(&self, session: &SessionId) -> Decision {
        self.acquire_inner(session, 1.0, false)
    }

    fn acquire_inner(&self, session: &SessionId, wanted: f64, consume: bool) -> Decision {
        if !self.config.enabled {
            return Decision::Allow;
        }

        let now = Instant::now();
        let bucket = self
            .buckets
            .get_with(session.clone(), || {
                std::sync::Arc::new(Mutex::new(Bucket {
                    tokens: self.config.max_messages_per_minute as f64,
                    last_refill: now,
                    first_seen: now,
                    last_contact: now,
                }))
            });

        let mut bucket = bucket.lock();
        let was_cold_contact = now.duration_since(bucket.last_contact) > Duration::from_secs(60 * 30);
        if consume {
            bucket.last_contact = now;
        }

        let elapsed_mins = now.duration_since(bucket.last_refill).as_secs_f64() / 60.0;
        let warmup_days = (self.config.warmup_period_days.max(1)) as f64;
        let age_days = now.duration_since(bucket.first_seen).as_secs_f64() / 86_400.0;
        let warmup_fraction = 0.3 + 0.7 * (age_days / warmup_days).min(1.0);

        let mut effective_rate = self.config.max_messages_per_minute as f64 * warmup_fraction;
        if was_cold_contact {
            effective_rate *= self.config.cold_contact_multiplier;
        }

        let refilled = (bucket.tokens + elapsed_mins * effective_rate).min(effective_rate.max(1.0));

        if !consume {
            return if refilled >= wanted { Decision::Allow } else { Decision::Throttle };
        }

        bucket.tokens = refilled;
        bucket.last_refill = now;

        if bucket.tokens >= wanted {
            bucket.tokens -= wanted;
            Decision::Allow
        } else {
            Decision::Throttle
        }
    }

    /// Awaits until `tokens` are available, polling at a short fixed interval and
    /// honoring cancellation so a caller shutting down doesn't wait forever on a
    /// throttled session.
    pub async fn acquire(&self, session: &SessionId, tokens: u32, cancel: &tokio_util::sync::CancellationToken) {
        loop {
            if self.try_acquire(session, tokens) == Decision::Allow {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    /// A small random delay to spread out retries after a throttle decision, per the
    /// configured jitter range.
    pub fn jitter(&self) -> Duration {
        let (min, max) = self.config.jitter_range_ms;
        if min >= max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}
