//! Named metrics emitted through the `metrics` crate facade. This crate never stands up
//! a metrics server or exporter — it only records against whatever recorder the
//! embedding binary has installed. Names are stable for scraping; do not rename.

pub const HOT_HITS_TOTAL: &str = "hot_hits_total";
pub const HOT_MISSES_TOTAL: &str = "hot_misses_total";
pub const COLD_FALLBACKS_TOTAL: &str = "cold_fallbacks_total";

pub const BREAKER_OPEN_TOTAL: &str = "breaker_open_total";
pub const BREAKER_CLOSE_TOTAL: &str = "breaker_close_total";
pub const BREAKER_HALFOPEN_TOTAL: &str = "breaker_halfopen_total";

pub const RECONCILER_LATENCY_SECONDS: &str = "reconciler_latency_seconds";
pub const RECONCILER_FAILURES_TOTAL: &str = "reconciler_failures_total";

pub const OPERATION_LATENCY_SECONDS: &str = "operation_latency_seconds";

pub const QUEUE_PUBLISHES_TOTAL: &str = "queue_publishes_total";
pub const QUEUE_FAILURES_TOTAL: &str = "queue_failures_total";
pub const DIRECT_WRITES_TOTAL: &str = "direct_writes_total";

/// `breaker_skipped` means the hot miss never reached the cold tier at all (the breaker
/// was open), so it doesn't count as a fallback.
pub fn record_get(hit: bool, breaker_skipped: bool, elapsed_secs: f64) {
    if hit {
        metrics::counter!(HOT_HITS_TOTAL).increment(1);
    } else {
        metrics::counter!(HOT_MISSES_TOTAL).increment(1);
        if !breaker_skipped {
            metrics::counter!(COLD_FALLBACKS_TOTAL).increment(1);
        }
    }
    metrics::histogram!(OPERATION_LATENCY_SECONDS, "op" => "get").record(elapsed_secs);
}

pub fn record_set(elapsed_secs: f64) {
    metrics::histogram!(OPERATION_LATENCY_SECONDS, "op" => "set").record(elapsed_secs);
}

/// An entry was appended to the write-behind outbox instead of (or after failing) a
/// synchronous cold write.
pub fn record_queue_publish() {
    metrics::counter!(QUEUE_PUBLISHES_TOTAL).increment(1);
}

/// An outbox entry's attempt failed, whether retried or dead-lettered.
pub fn record_queue_failure() {
    metrics::counter!(QUEUE_FAILURES_TOTAL).increment(1);
}

/// A `Set` committed synchronously to the cold tier (write-behind disabled, or a
/// session's outbox backlog forced the fallback).
pub fn record_direct_write() {
    metrics::counter!(DIRECT_WRITES_TOTAL).increment(1);
}

pub fn record_breaker_open() {
    metrics::counter!(BREAKER_OPEN_TOTAL).increment(1);
}

pub fn record_breaker_close() {
    metrics::counter!(BREAKER_CLOSE_TOTAL).increment(1);
}

pub fn record_breaker_halfopen() {
    metrics::counter!(BREAKER_HALFOPEN_TOTAL).increment(1);
}

pub fn record_reconciler_latency(elapsed_secs: f64) {
    metrics::histogram!(RECONCILER_LATENCY_SECONDS).record(elapsed_secs);
}

pub fn record_reconciler_failure() {
    metrics::counter!(RECONCILER_FAILURES_TOTAL).increment(1);
}
