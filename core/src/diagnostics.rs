//! Aggregates [`RotationMonitor`], [`ConnectionTracker`] and [`RateLimiter`] into a
//! single per-session health report.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::MonitoringConfig;
use crate::connection_tracker::{ConnectionState, ConnectionTracker};
use crate::model::SessionId;
use crate::rate_limiter::RateLimiter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckStatus {
    Ok,
    Warning,
    Critical,
}

/// Counts credential-rotation events per minute per session via a one-minute sliding
/// bucket of timestamps; `status` compares the count against the configured threshold.
pub struct RotationMonitor {
    threshold_per_minute: u32,
    events: DashMap<SessionId, Vec<Instant>>,
}

impl RotationMonitor {
    pub fn new(threshold_per_minute: u32) -> Self {
        RotationMonitor { threshold_per_minute, events: DashMap::new() }
    }

    pub fn record_rotation(&self, session: &SessionId) {
        let mut entry = self.events.entry(session.clone()).or_default();
        entry.push(Instant::now());
        self.prune(&mut entry);
    }

    pub fn status(&self, session: &SessionId) -> CheckStatus {
        let Some(mut entry) = self.events.get_mut(session) else { return CheckStatus::Ok };
        self.prune(&mut entry);
        let count = entry.len() as u32;
        if count >= self.threshold_per_minute {
            CheckStatus::Critical
        } else if count as f64 >= 0.8 * self.threshold_per_minute as f64 {
            CheckStatus::Warning
        } else {
            CheckStatus::Ok
        }
    }

    fn prune(&self, events: &mut Vec<Instant>) {
        let cutoff = Duration::from_secs(60);
        events.retain(|t| t.elapsed() < cutoff);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionHealthReport {
    pub session: SessionId,
    pub rotation: CheckStatus,
    pub connection: CheckStatus,
    pub rate_limit: CheckStatus,
    pub worst: CheckStatus,
}

pub struct DiagnosticEngine {
    pub rotation_monitor: RotationMonitor,
    pub connection_tracker: Arc<ConnectionTracker>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl DiagnosticEngine {
    pub fn new(
        monitoring: MonitoringConfig,
        connection_tracker: Arc<ConnectionTracker>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        DiagnosticEngine {
            rotation_monitor: RotationMonitor::new(monitoring.rotation_threshold_per_minute),
            connection_tracker,
            rate_limiter,
        }
    }

    fn connection_status(&self, session: &SessionId) -> CheckStatus {
        match self.connection_tracker.check_health(session).status {
            ConnectionState::Healthy => CheckStatus::Ok,
            ConnectionState::Degraded | ConnectionState::Reconnecting => CheckStatus::Warning,
            ConnectionState::Disconnected => CheckStatus::Critical,
        }
    }

    fn rate_limit_status(&self, session: &SessionId) -> CheckStatus {
        use crate::rate_limiter::Decision;
        match self.rate_limiter.status(session) {
            Decision::Allow => CheckStatus::Ok,
            Decision::Throttle => CheckStatus::Warning,
        }
    }

    pub fn full_report(&self, session: &SessionId) -> SessionHealthReport {
        let rotation = self.rotation_monitor.status(session);
        let connection = self.connection_status(session);
        let rate_limit = self.rate_limit_status(session);
        let worst = [rotation, connection, rate_limit].into_iter().max().unwrap();

        SessionHealthReport { session: session.clone(), rotation, connection, rate_limit, worst }
    }

    /// Returns the worst per-check status, without building the full report.
    pub fn quick_check(&self, session: &SessionId) -> CheckStatus {
        [
            self.rotation_monitor.status(session),
            self.connection_status(session),
            self.rate_limit_status(session),
        ]
        .into_iter()
        .max()
        .unwrap()
    }

    pub fn sessions_requiring_attention(&self, sessions: &[SessionId]) -> Vec<SessionId> {
        sessions
            .iter()
            .filter(|s| self.quick_check(s) != CheckStatus::Ok)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;

    fn monitoring() -> MonitoringConfig {
        MonitoringConfig {
            enabled: true,
            rotation_threshold_per_minute: 5,
            silence_threshold_ms: 10_000,
            disconnect_threshold_ms: 60_000,
        }
    }

    fn engine() -> DiagnosticEngine {
        DiagnosticEngine::new(
            monitoring(),
            Arc::new(ConnectionTracker::new(monitoring())),
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
        )
    }

    #[test]
    fn quick_check_is_ok_for_untouched_session_rotation() {
        let engine = engine();
        let session = SessionId::new("s1").unwrap();
        assert_eq!(engine.rotation_monitor.status(&session), CheckStatus::Ok);
    }

    #[test]
    fn rotation_status_escalates_with_event_rate() {
        let engine = engine();
        let session = SessionId::new("s1").unwrap();
        for _ in 0..4 {
            engine.rotation_monitor.record_rotation(&session);
        }
        assert_eq!(engine.rotation_monitor.status(&session), CheckStatus::Warning);

        engine.rotation_monitor.record_rotation(&session);
        assert_eq!(engine.rotation_monitor.status(&session), CheckStatus::Critical);
    }

    #[test]
    fn worst_status_wins_in_full_report() {
        let engine = engine();
        let session = SessionId::new("s1").unwrap();
        for _ in 0..5 {
            engine.rotation_monitor.record_rotation(&session);
        }
        let report = engine.full_report(&session);
        assert_eq!(report.worst, CheckStatus::Critical);
        assert_eq!(report.rotation, CheckStatus::Critical);
    }

    #[test]
    fn sessions_requiring_attention_filters_ok_sessions() {
        let engine = engine();
        let quiet = SessionId::new("quiet").unwrap();
        let noisy = SessionId::new("noisy").unwrap();
        for _ in 0..5 {
            engine.rotation_monitor.record_rotation(&noisy);
        }

        let attention = engine.sessions_requiring_attention(&[quiet.clone(), noisy.clone()]);
        assert_eq!(attention, vec![noisy]);
    }
}
