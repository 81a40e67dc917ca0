//! 캡처 세션 -- 포워드 루프와 수집 파이프라인 생명주기
//!
//! [`CaptureSession::start`]가 반환하는 [`SessionHandle`]이 세션의 유일한
//! 접근 경로입니다. 전역 "현재 세션" 참조는 없으며, 상태 조회와 정지는 모두
//! 핸들을 통해 이루어집니다.
//!
//! # 사용 예시
//! ```ignore
//! let pipeline = IngestionPipeline::builder().store(store).build()?;
//! let session = CaptureSession::new(ForwardConfig::default(), pipeline);
//! let mut handle = session.start(FdInterface::open_tun("tun0")?).await?;
//!
//! let stats = handle.snapshot();
//! handle.stop().await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::SystemTime;

use tokio::runtime::Handle;

use packethunter_core::error::{CaptureError, PacketHunterError};
use packethunter_core::pipeline::{HealthStatus, Pipeline};
use packethunter_core::types::{AppTalker, CaptureStats, ParsedPacket};
use packethunter_pipeline::IngestionPipeline;

use crate::config::ForwardConfig;
use crate::forward::{ForwardExit, ForwardLoop, ForwardSnapshot, ForwardStats};
use crate::tun::TunInterface;

/// 시작 전 캡처 세션
pub struct CaptureSession {
    config: ForwardConfig,
    pipeline: IngestionPipeline,
}

impl CaptureSession {
    pub fn new(config: ForwardConfig, pipeline: IngestionPipeline) -> Self {
        Self { config, pipeline }
    }

    /// 세션을 시작합니다.
    ///
    /// 수집 파이프라인을 먼저 시작한 뒤 포워드 스레드를 띄웁니다.
    /// tokio 런타임 안에서 호출해야 합니다.
    ///
    /// # 에러
    /// - `CaptureError::InterfaceUnavailable`: 인터페이스 검증 실패
    /// - `CaptureError::ForwardIo`: 포워드 스레드 생성 실패
    /// - 설정 검증 또는 파이프라인 시작 실패
    pub async fn start<I: TunInterface>(
        mut self,
        interface: I,
    ) -> Result<SessionHandle, PacketHunterError> {
        self.config.validate()?;
        if !interface.is_valid() {
            return Err(CaptureError::InterfaceUnavailable(format!(
                "interface '{}' failed validity check",
                interface.name()
            ))
            .into());
        }
        let interface_name = interface.name().to_owned();

        self.pipeline.start().await?;

        let stop = Arc::new(AtomicBool::new(false));
        let forward = ForwardLoop::new(
            interface,
            self.config.clone(),
            self.pipeline.handle(),
            Handle::current(),
            Arc::clone(&stop),
        );
        let forward_stats = forward.stats();
        let thread = match forward.spawn() {
            Ok(thread) => thread,
            Err(e) => {
                if let Err(stop_err) = self.pipeline.stop().await {
                    tracing::warn!(error = %stop_err, "failed to stop pipeline after forward spawn error");
                }
                return Err(CaptureError::ForwardIo(e).into());
            }
        };

        tracing::info!(interface = %interface_name, "capture session started");

        Ok(SessionHandle {
            interface_name,
            pipeline: self.pipeline,
            stop,
            forward_stats,
            forward_thread: Some(thread),
            started_at: SystemTime::now(),
            stopped: false,
        })
    }
}

/// 실행 중인 캡처 세션 핸들
pub struct SessionHandle {
    interface_name: String,
    pipeline: IngestionPipeline,
    stop: Arc<AtomicBool>,
    forward_stats: Arc<ForwardStats>,
    forward_thread: Option<JoinHandle<ForwardExit>>,
    started_at: SystemTime,
    stopped: bool,
}

impl SessionHandle {
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// 포워드 루프가 아직 돌고 있는지
    pub fn is_forwarding(&self) -> bool {
        !self.stopped && self.forward_stats.is_running()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// 최신 통계 스냅샷
    pub fn snapshot(&self) -> CaptureStats {
        self.pipeline.snapshot()
    }

    /// 링 버퍼 내용 (오래된 것부터)
    pub fn recent_packets(&self) -> Vec<ParsedPacket> {
        self.pipeline.recent_packets()
    }

    pub fn forwarding_stats(&self) -> ForwardSnapshot {
        self.forward_stats.snapshot()
    }

    /// 포워드 루프가 끝났다면 그 사유
    pub fn forward_exit_reason(&self) -> Option<String> {
        self.forward_stats.exit_reason()
    }

    pub fn queue_depth(&self) -> u64 {
        self.pipeline.queue_depth()
    }

    pub fn app_talkers(&self, limit: usize) -> Vec<AppTalker> {
        self.pipeline.app_talkers(limit)
    }

    /// 수집 파이프라인 참조
    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    /// 세션 건강 상태
    ///
    /// - `Healthy`: 포워딩 중이고 분석 경로도 정상
    /// - `Degraded`: 포워드 루프는 끝났지만 consumer가 남은 큐를 처리 중,
    ///   또는 포워딩 중이지만 분석 경로에 문제가 있음
    /// - `Unhealthy`: 세션 정지
    pub async fn health(&self) -> HealthStatus {
        if self.stopped {
            return HealthStatus::Unhealthy("session stopped".to_owned());
        }

        let analysis = self.pipeline.health_check().await;
        if !self.forward_stats.is_running() {
            let reason = self
                .forward_stats
                .exit_reason()
                .unwrap_or_else(|| "unknown".to_owned());
            return match analysis {
                HealthStatus::Unhealthy(msg) => HealthStatus::Unhealthy(format!(
                    "forward loop exited ({reason}) and analysis unavailable: {msg}"
                )),
                _ => HealthStatus::Degraded(format!("forward loop exited: {reason}")),
            };
        }

        match analysis {
            HealthStatus::Healthy => HealthStatus::Healthy,
            HealthStatus::Degraded(msg) => HealthStatus::Degraded(msg),
            HealthStatus::Unhealthy(msg) => {
                HealthStatus::Degraded(format!("analysis unavailable: {msg}"))
            }
        }
    }

    /// 세션을 정지합니다.
    ///
    /// 포워드 루프에 정지를 알리고 인터페이스가 닫힐 때까지 기다린 뒤,
    /// 수집 파이프라인을 취소합니다. 파이프라인의 남은 작업은 기다리지 않습니다.
    pub async fn stop(&mut self) -> Result<(), PacketHunterError> {
        if self.stopped {
            return Err(CaptureError::NotRunning.into());
        }
        self.stopped = true;

        tracing::info!(interface = %self.interface_name, "stopping capture session");
        self.stop.store(true, Ordering::Release);

        if let Some(thread) = self.forward_thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(exit)) => tracing::debug!(reason = %exit, "forward thread joined"),
                Ok(Err(_)) => tracing::error!("forward thread panicked"),
                Err(e) => tracing::warn!(error = %e, "failed to join forward thread"),
            }
        }

        self.pipeline.stop().await?;

        let forwarded = self.forward_stats.snapshot();
        tracing::info!(
            interface = %self.interface_name,
            frames = forwarded.frames_forwarded,
            bytes = forwarded.bytes_forwarded,
            processed = self.pipeline.processed_count(),
            "capture session stopped"
        );
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
