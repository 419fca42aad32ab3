//! Per-session liveness, derived from activity timestamps with two explicit overrides
//! (`Disconnected`, `Reconnecting`) that dominate the timestamp-based derivation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::config::MonitoringConfig;
use crate::model::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Healthy,
    Degraded,
    Disconnected,
    Reconnecting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recommendation {
    None,
    Ping,
    Reconnect,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthCheck {
    pub status: ConnectionState,
    pub silent_ms: u64,
    pub recommendation: Recommendation,
}

#[derive(Clone, Copy)]
enum Override {
    Disconnected,
    Reconnecting,
}

struct Tracked {
    last_activity: Instant,
    explicit: Option<Override>,
}

static LISTENER_IDS: AtomicU64 = AtomicU64::new(1);

pub struct ConnectionTracker {
    config: MonitoringConfig,
    sessions: DashMap<SessionId, Tracked>,
    listeners: Arc<DashMap<u64, mpsc::UnboundedSender<(SessionId, HealthCheck)>>>,
}

impl ConnectionTracker {
    pub fn new(config: MonitoringConfig) -> Self {
        ConnectionTracker {
            config,
            sessions: DashMap::new(),
            listeners: Arc::new(DashMap::new()),
        }
    }

    pub fn record_activity(&self, session: &SessionId) {
        let now = Instant::now();
        self.sessions
            .entry(session.clone())
            .and_modify(|t| {
                t.last_activity = now;
                t.explicit = None;
            })
            .or_insert(Tracked { last_activity: now, explicit: None });
        self.maybe_notify(session);
    }

    pub fn record_reconnect_attempt(&self, session: &SessionId) {
        self.sessions
            .entry(session.clone())
            .and_modify(|t| t.explicit = Some(Override::Reconnecting))
            .or_insert(Tracked { last_activity: Instant::now(), explicit: Some(Override::Reconnecting) });
        self.maybe_notify(session);
    }

    pub fn record_disconnect(&self, session: &SessionId) {
        self.sessions
            .entry(session.clone())
            .and_modify(|t| t.explicit = Some(Override::Disconnected))
            .or_insert(Tracked { last_activity: Instant::now(), explicit: Some(Override::Disconnected) });
        self.maybe_notify(session);
    }

    pub fn check_health(&self, session: &SessionId) -> HealthCheck {
        let Some(tracked) = self.sessions.get(session) else {
            return HealthCheck {
                status: ConnectionState::Disconnected,
                silent_ms: u64::MAX,
                recommendation: Recommendation::Reconnect,
            };
        };

        let silent_ms = tracked.last_activity.elapsed().as_millis() as u64;
        let status = match tracked.explicit {
            Some(Override::Disconnected) => ConnectionState::Disconnected,
            Some(Override::Reconnecting) => ConnectionState::Reconnecting,
            None if silent_ms > self.config.disconnect_threshold_ms => ConnectionState::Disconnected,
            None if silent_ms > self.config.silence_threshold_ms => ConnectionState::Degraded,
            None => ConnectionState::Healthy,
        };

        let recommendation = match status {
            ConnectionState::Healthy => Recommendation::None,
            ConnectionState::Degraded => Recommendation::Ping,
            ConnectionState::Disconnected | ConnectionState::Reconnecting => Recommendation::Reconnect,
        };

        HealthCheck { status, silent_ms, recommendation }
    }

    /// Registers a listener notified on every non-`Healthy` transition. The returned
    /// [`ListenerHandle`] deregisters on `Drop`; the tracker never holds caller state
    /// beyond the channel endpoint itself.
    pub fn subscribe(&self) -> (mpsc::UnboundedReceiver<(SessionId, HealthCheck)>, ListenerHandle) {
        let id = LISTENER_IDS.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.insert(id, tx);
        (rx, ListenerHandle { id, listeners: self.listeners.clone() })
    }

    fn maybe_notify(&self, session: &SessionId) {
        let check = self.check_health(session);
        if check.status == ConnectionState::Healthy {
            return;
        }
        self.listeners.retain(|_, tx| tx.send((session.clone(), check)).is_ok());
    }

    pub fn prune_disconnected(&self) {
        let threshold = Duration::from_millis(self.config.disconnect_threshold_ms);
        self.sessions.retain(|_, tracked| tracked.last_activity.elapsed() < threshold);
    }
}

pub struct ListenerHandle {
    id: u64,
    listeners: Arc<DashMap<u64, mpsc::UnboundedSender<(SessionId, HealthCheck)>>>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.listeners.remove(&self.id);
    }
}
