use std::time::{Duration, SystemTime};

use tracing::info;

/// Reported once per dead tunnel whose downtime exceeds the server's
/// configured disconnect threshold.
#[derive(Debug, Clone)]
pub struct DisconnectEvent {
    pub client_id: String,
    pub last_seen: SystemTime,
    pub duration: Duration,
}

/// External collaborator notified of long-lived tunnel disconnects.
/// Implementing this against a real alerting system is out of scope;
/// the core ships only [`LoggingDisconnectSink`].
pub trait DisconnectSink: Send + Sync {
    fn on_disconnect(&self, event: DisconnectEvent);
}

/// Snapshot of server-wide activity, emitted once per 60 s.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub active_tunnels: usize,
    pub active_sessions: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub per_client: Vec<(String, usize)>,
}

/// External collaborator that receives periodic [`StatsSnapshot`]s.
/// A real web-UI/HTTP sink is out of scope; the core ships only
/// [`LoggingStatsSink`].
pub trait StatsSink: Send + Sync {
    fn on_snapshot(&self, snapshot: StatsSnapshot);
}

/// Default [`DisconnectSink`] that just logs at `warn`.
pub struct LoggingDisconnectSink;

impl DisconnectSink for LoggingDisconnectSink {
    fn on_disconnect(&self, event: DisconnectEvent) {
        tracing::warn!(
            client_id = %event.client_id,
            duration_secs = event.duration.as_secs(),
            "client tunnel disconnected"
        );
    }
}

/// Default [`StatsSink`] that just logs at `info`.
pub struct LoggingStatsSink;

impl StatsSink for LoggingStatsSink {
    fn on_snapshot(&self, snapshot: StatsSnapshot) {
        info!(
            active_tunnels = snapshot.active_tunnels,
            active_sessions = snapshot.active_sessions,
            bytes_in = snapshot.bytes_in,
            bytes_out = snapshot.bytes_out,
            "server stats snapshot"
        );
    }
}
