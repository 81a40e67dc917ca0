//! Aggregated health reporting.
//!
//! Combines the capture session health with the forwarding and ingestion
//! counters into a single serializable [`DaemonHealth`] report.

use serde::Serialize;

use packethunter_capture::SessionHandle;
use packethunter_core::pipeline::HealthStatus;

/// Health report for the whole daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall status (worst of forwarding and analysis).
    pub status: HealthStatus,
    /// Daemon uptime in seconds.
    pub uptime_secs: u64,
    /// Attached interface, if a session is running.
    pub interface: Option<String>,
    pub frames_forwarded: u64,
    pub bytes_forwarded: u64,
    pub forward_write_failures: u64,
    pub packets_processed: u64,
    pub queue_depth: u64,
    pub alerts: u64,
}

impl DaemonHealth {
    /// Report for a daemon that has no running session.
    pub fn idle(uptime_secs: u64) -> Self {
        Self {
            status: HealthStatus::Unhealthy("no capture session".to_owned()),
            uptime_secs,
            interface: None,
            frames_forwarded: 0,
            bytes_forwarded: 0,
            forward_write_failures: 0,
            packets_processed: 0,
            queue_depth: 0,
            alerts: 0,
        }
    }

    /// Build a report from a running (or stopped) session.
    pub async fn from_session(session: &SessionHandle, uptime_secs: u64) -> Self {
        let forwarding = session.forwarding_stats();
        let pipeline = session.pipeline();
        Self {
            status: session.health().await,
            uptime_secs,
            interface: Some(session.interface_name().to_owned()),
            frames_forwarded: forwarding.frames_forwarded,
            bytes_forwarded: forwarding.bytes_forwarded,
            forward_write_failures: forwarding.write_failures,
            packets_processed: pipeline.processed_count(),
            queue_depth: pipeline.queue_depth(),
            alerts: pipeline.alert_count(),
        }
    }

    /// Short label for log lines.
    pub fn status_label(&self) -> &'static str {
        match self.status {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded(_) => "degraded",
            HealthStatus::Unhealthy(_) => "unhealthy",
        }
    }
}
