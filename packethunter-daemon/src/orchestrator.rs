//! Session orchestration -- assembly, startup, supervision and shutdown.
//!
//! The [`Orchestrator`] is the central coordinator of `packethunter-daemon`.
//! It wires the bundled collaborators (in-memory store, live broadcast sink,
//! `/proc/net` attribution) into the ingestion pipeline, attaches the capture
//! session to the TUN interface and supervises it until a shutdown signal
//! arrives or the forward loop exits.
//!
//! # Startup Order
//!
//! 1. Metrics recorder (if enabled)
//! 2. Custom rules loaded into the store
//! 3. Ingestion pipeline (consumer, stats timer, attribution timer)
//! 4. Forward thread on the interface
//!
//! # Shutdown Order
//!
//! 1. Background tasks (alert logger)
//! 2. Forward loop (interface closed)
//! 3. Ingestion pipeline (cancelled without draining)

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use packethunter_capture::{CaptureSession, ForwardConfig, SessionHandle, TunInterface};
use packethunter_core::config::PacketHunterConfig;
use packethunter_core::pipeline::{Attribution, LiveSink};
use packethunter_pipeline::{
    BroadcastSink, IngestConfig, IngestionPipeline, LiveEvent, MemoryStore, RuleLoader,
};

use crate::health::DaemonHealth;
use crate::metrics_server;

/// Live event channel capacity.
const LIVE_CHANNEL_CAPACITY: usize = 256;

/// Default interval between health log lines.
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Reason returned by [`Orchestrator::supervise`] when forwarding stops on its own.
pub const FORWARD_EXITED: &str = "forward loop exited";

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: PacketHunterConfig,
    store: Arc<MemoryStore>,
    sink: Arc<BroadcastSink>,
    /// Built pipeline, moved into the session on start.
    pipeline: Option<IngestionPipeline>,
    session: Option<SessionHandle>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    health_interval: Duration,
    start_time: Instant,
}

impl Orchestrator {
    /// Build from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The metrics recorder cannot be installed
    /// - The ingestion pipeline cannot be built
    pub async fn build_from_config(config: PacketHunterConfig) -> Result<Self> {
        config.validate().context("config validation failed")?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }
        record_daemon_metrics();

        let store = Arc::new(MemoryStore::new());
        if let Some(path) = &config.detection.rules_path {
            match RuleLoader::load_file(path).await {
                Ok(rules) => {
                    tracing::info!(path = %path, count = rules.len(), "custom rules loaded");
                    store.set_rules(rules);
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "custom rules not loaded");
                }
            }
        }

        let sink = Arc::new(BroadcastSink::new(LIVE_CHANNEL_CAPACITY));
        let live: Arc<dyn LiveSink> = Arc::clone(&sink) as Arc<dyn LiveSink>;
        let pipeline = IngestionPipeline::builder()
            .config(IngestConfig::from_core(&config.pipeline, &config.detection))
            .store(Arc::clone(&store))
            .attribution(default_attribution())
            .live_sink(live)
            .build()
            .context("failed to build ingestion pipeline")?;

        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Self {
            config,
            store,
            sink,
            pipeline: Some(pipeline),
            session: None,
            shutdown_tx,
            tasks: Vec::new(),
            health_interval: DEFAULT_HEALTH_INTERVAL,
            start_time: Instant::now(),
        })
    }

    /// Override the health log interval.
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Open the configured TUN device, start the session and run until
    /// a shutdown signal or forward loop exit, then shut down.
    pub async fn run(&mut self) -> Result<()> {
        let interface = open_interface(&self.config.capture.interface_name)?;
        self.start_with(interface).await?;

        let reason = self.supervise(wait_for_shutdown_signal()).await;
        match &reason {
            Ok(reason) => tracing::info!(reason = *reason, "shutting down"),
            Err(e) => tracing::error!(error = %e, "supervision failed, shutting down"),
        }

        self.shutdown().await?;
        reason.map(|_| ())
    }

    /// Start the capture session on `interface`.
    pub async fn start_with<I: TunInterface>(&mut self, interface: I) -> Result<()> {
        let pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| anyhow::anyhow!("capture session already started"))?;

        let session = CaptureSession::new(ForwardConfig::from_core(&self.config.capture), pipeline)
            .start(interface)
            .await
            .context("failed to start capture session")?;

        self.tasks.push(spawn_alert_logger(
            self.sink.subscribe(),
            self.shutdown_tx.subscribe(),
        ));
        self.session = Some(session);
        Ok(())
    }

    /// Log health periodically until `shutdown` resolves or the forward loop exits.
    ///
    /// Returns the shutdown reason.
    pub async fn supervise<F>(&self, shutdown: F) -> Result<&'static str>
    where
        F: Future<Output = Result<&'static str>>,
    {
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(self.health_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                reason = &mut shutdown => return reason,
                _ = interval.tick() => {
                    let health = self.health().await;
                    tracing::debug!(
                        status = health.status_label(),
                        frames_forwarded = health.frames_forwarded,
                        packets_processed = health.packets_processed,
                        queue_depth = health.queue_depth,
                        alerts = health.alerts,
                        "daemon health"
                    );

                    if let Some(session) = &self.session
                        && !session.is_forwarding()
                    {
                        tracing::warn!(
                            reason = session.forward_exit_reason().as_deref().unwrap_or("unknown"),
                            "forward loop is no longer running"
                        );
                        return Ok(FORWARD_EXITED);
                    }
                }
            }
        }
    }

    /// Stop background tasks and the capture session.
    pub async fn shutdown(&mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        if let Some(session) = self.session.as_mut()
            && !session.is_stopped()
        {
            session.stop().await.context("failed to stop capture session")?;
        }

        tracing::info!(uptime_secs = self.start_time.elapsed().as_secs(), "daemon shut down");
        Ok(())
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let uptime_secs = self.start_time.elapsed().as_secs();
        match &self.session {
            Some(session) => DaemonHealth::from_session(session, uptime_secs).await,
            None => DaemonHealth::idle(uptime_secs),
        }
    }

    pub fn config(&self) -> &PacketHunterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn sink(&self) -> &Arc<BroadcastSink> {
        &self.sink
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }
}

#[cfg(target_os = "linux")]
fn default_attribution() -> Arc<dyn Attribution> {
    Arc::new(packethunter_pipeline::ProcNetAttribution::new())
}

#[cfg(not(target_os = "linux"))]
fn default_attribution() -> Arc<dyn Attribution> {
    Arc::new(packethunter_pipeline::NoAttribution)
}

#[cfg(target_os = "linux")]
fn open_interface(name: &str) -> Result<packethunter_capture::FdInterface> {
    packethunter_capture::FdInterface::open_tun(name)
        .with_context(|| format!("failed to open tun interface '{name}'"))
}

#[cfg(not(target_os = "linux"))]
fn open_interface(name: &str) -> Result<packethunter_capture::MemoryInterface> {
    anyhow::bail!("tun interface '{name}' requires Linux")
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to listen for ctrl-c: {}", e))?;
    Ok("ctrl-c")
}

/// Log every alert published on the live channel.
fn spawn_alert_logger(
    mut events: broadcast::Receiver<LiveEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(LiveEvent::Alert(alert)) => tracing::warn!(
                        kind = alert.kind.as_str(),
                        severity = alert.severity.as_label(),
                        title = %alert.title,
                        description = %alert.description,
                        packet_id = alert.related_packet_id,
                        "alert raised"
                    ),
                    Ok(LiveEvent::Snapshot { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "alert logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown_rx.recv() => {
                    tracing::debug!("alert logger shutting down");
                    break;
                }
            }
        }
    })
}

/// Record daemon-level metrics (build info).
fn record_daemon_metrics() {
    use packethunter_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}
