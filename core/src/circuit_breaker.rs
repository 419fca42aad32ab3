//! Gates calls to the cold tier only. Three states — closed, open, half-open — driven
//! by the failure ratio over a trailing rolling window of fixed-size per-second buckets.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    second: u64,
    successes: u32,
    failures: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircuitBreakerConfig {
    pub window_secs: usize,
    pub failure_ratio_threshold: f64,
    pub minimum_requests: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            window_secs: 60,
            failure_ratio_threshold: 0.5,
            minimum_requests: 10,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub successes: u32,
    pub failures: u32,
}

struct Inner {
    state: CircuitState,
    buckets: Vec<Bucket>,
    opened_at: Option<Instant>,
    start: Instant,
    /// Set the instant `HalfOpen` admits its one trial caller, cleared when that trial
    /// resolves (`record_success`/`record_failure`). Guards against every waiter that
    /// polls `is_open` during the cooldown window being admitted at once.
    half_open_trial_in_flight: bool,
}

/// Only the cold-tier call site consults [`CircuitBreaker::is_open`] before dispatching;
/// the hot tier and the outbox are never gated.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    transitions: broadcast::Sender<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(32);
        CircuitBreaker {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                buckets: vec![Bucket::default(); config.window_secs],
                opened_at: None,
                start: Instant::now(),
                half_open_trial_in_flight: false,
            }),
            config,
            transitions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CircuitState> {
        self.transitions.subscribe()
    }

    /// Whether a cold-tier call should be attempted right now. Flips `open -> half-open`
    /// as a side effect once the cooldown has elapsed, admitting exactly one trial
    /// caller; every other caller sees `true` (still short-circuited) until that trial
    /// resolves via `record_success`/`record_failure`.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Open => {
                if let Some(opened_at) = inner.opened_at {
                    if opened_at.elapsed() >= self.config.cooldown {
                        inner.state = CircuitState::HalfOpen;
                        inner.half_open_trial_in_flight = true;
                        drop(inner);
                        let _ = self.transitions.send(CircuitState::HalfOpen);
                        crate::metrics::record_breaker_halfopen();
                        return false;
                    }
                }
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_trial_in_flight {
                    true
                } else {
                    inner.half_open_trial_in_flight = true;
                    false
                }
            }
            CircuitState::Closed => false,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.bump(&mut inner, true);
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            inner.half_open_trial_in_flight = false;
            drop(inner);
            let _ = self.transitions.send(CircuitState::Closed);
            crate::metrics::record_breaker_close();
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        self.bump(&mut inner, false);

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.half_open_trial_in_flight = false;
            drop(inner);
            let _ = self.transitions.send(CircuitState::Open);
            crate::metrics::record_breaker_open();
            return;
        }

        if inner.state == CircuitState::Closed {
            let (successes, failures) = self.window_totals(&inner);
            let total = successes + failures;
            if total >= self.config.minimum_requests {
                let ratio = failures as f64 / total as f64;
                if ratio > self.config.failure_ratio_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    drop(inner);
                    let _ = self.transitions.send(CircuitState::Open);
                    crate::metrics::record_breaker_open();
                }
            }
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let (successes, failures) = self.window_totals(&inner);
        CircuitBreakerStats {
            state: inner.state,
            successes,
            failures,
        }
    }

    fn current_second(&self, inner: &Inner) -> u64 {
        inner.start.elapsed().as_secs()
    }

    fn bump(&self, inner: &mut Inner, success: bool) {
        let second = self.current_second(inner);
        let len = inner.buckets.len();
        let idx = (second as usize) % len;
        if inner.buckets[idx].second != second {
            inner.buckets[idx] = Bucket { second, successes: 0, failures: 0 };
        }
        if success {
            inner.buckets[idx].successes += 1;
        } else {
            inner.buckets[idx].failures += 1;
        }
    }

    fn window_totals(&self, inner: &Inner) -> (u32, u32) {
        let second = self.current_second(inner);
        let window = self.config.window_secs as u64;
        inner
            .buckets
            .iter()
            .filter(|b| second.saturating_sub(b.second) < window)
            .fold((0u32, 0u32), |(s, f), b| (s + b.successes, f + b.failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_secs: 60,
            failure_ratio_threshold: 0.5,
            minimum_requests: 4,
            cooldown: Duration::from_millis(20),
        }
    }

    #[test]
    fn opens_after_failure_ratio_exceeds_threshold() {
        let breaker = CircuitBreaker::new(config());
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());
        assert_eq!(breaker.stats().state, CircuitState::Open);
    }

    #[test]
    fn stays_closed_below_minimum_requests() {
        let breaker = CircuitBreaker::new(config());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn half_opens_after_cooldown_then_closes_on_success() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!breaker.is_open());
        assert_eq!(breaker.stats().state, CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.stats().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_trial_caller() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..4 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // First caller gets the trial; every subsequent caller is still short-circuited
        // until the trial resolves.
        assert!(!breaker.is_open());
        assert_eq!(breaker.stats().state, CircuitState::HalfOpen);
        for _ in 0..5 {
            assert!(breaker.is_open());
        }

        breaker.record_success();
        assert_eq!(breaker.stats().state, CircuitState::Closed);
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..4 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert_eq!(breaker.stats().state, CircuitState::Open);
    }

    #[test]
    fn transitions_are_broadcast() {
        let breaker = CircuitBreaker::new(config());
        let mut rx = breaker.subscribe();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(rx.try_recv().unwrap(), CircuitState::Open);
    }
}
