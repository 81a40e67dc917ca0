//! 수집 파이프라인 오케스트레이션 -- 프레임 수신부터 저장/통계/탐지까지의 흐름을 관리합니다.
//!
//! [`IngestionPipeline`]은 core의 [`Pipeline`] trait을 구현하여 캡처 세션과
//! 데몬에서 동일한 생명주기(start/stop/health_check)로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! forward loop ──enqueue──▶ unbounded mpsc ──▶ consumer (단일 태스크)
//!                                                │
//!                                                ├── ParserAdapter
//!                                                ├── PacketStore (spawn, 기다리지 않음)
//!                                                ├── SessionState (링 버퍼, 카운터, 윈도우)
//!                                                ├── Attribution
//!                                                └── DetectionEngine ──▶ AlertDispatcher
//!
//! StatsEngine (주기 태스크) ──▶ CaptureStats 스냅샷 + LiveSink
//! Attribution refresh (주기 태스크)
//! ```
//!
//! # 순서 보장
//! 큐에 들어간 프레임은 넣은 순서대로 처리됩니다. 여러 producer 태스크가 동시에
//! 넣는 경우 캡처 순서와 큐 순서는 일치하지 않을 수 있습니다 (best-effort).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant as StdInstant;

use packethunter_core::error::{PacketHunterError, PipelineError};
use packethunter_core::metrics as m;
use packethunter_core::pipeline::{
    AlertStore, Attribution, FrameDecoder, HealthStatus, LiveSink, PacketStore, Pipeline,
    RuleStore,
};
use packethunter_core::types::{AppTalker, CaptureStats, CustomRule, ParsedPacket, RawFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::adapter::ParserAdapter;
use crate::alert::AlertDispatcher;
use crate::attribution::NoAttribution;
use crate::config::IngestConfig;
use crate::decoder::EtherparseDecoder;
use crate::detector::DetectionEngine;
use crate::error::IngestError;
use crate::stats::{SessionState, StatsEngine};

/// 이 깊이를 넘으면 health check가 `Degraded`를 보고합니다.
const QUEUE_DEPTH_DEGRADED: u64 = 100_000;

/// N개 패킷마다 탐지 상태의 만료 엔트리를 정리합니다.
const DETECTION_CLEANUP_EVERY: u64 = 1024;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 수집 경로 카운터
#[derive(Debug, Default)]
pub struct IngestCounters {
    /// 큐에 들어간 프레임 수
    pub enqueued: AtomicU64,
    /// 처리된 패킷 수 (파싱 성공)
    pub processed: AtomicU64,
    /// 패킷 저장 실패 수
    pub storage_failures: AtomicU64,
    /// 귀속 실패 수
    pub attribution_failures: AtomicU64,
    /// 분석 도중 패닉으로 건너뛴 프레임 수
    pub processing_panics: AtomicU64,
}

/// 큐 투입 핸들
///
/// 여러 producer 태스크에 복제해 나눠줄 수 있습니다. 투입은 막히지 않으며,
/// 파이프라인이 정지된 뒤에만 실패합니다.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::UnboundedSender<RawFrame>,
    queue_depth: Arc<AtomicU64>,
    counters: Arc<IngestCounters>,
    /// `stop()` 이후 true
    stopped: Arc<AtomicBool>,
}

impl IngestHandle {
    /// 프레임을 큐에 넣습니다.
    ///
    /// # Errors
    /// 파이프라인이 정지되었거나 consumer가 종료된 경우 [`IngestError::QueueClosed`]
    pub fn enqueue(&self, frame: RawFrame) -> Result<(), IngestError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(IngestError::QueueClosed);
        }
        // consumer의 감소보다 먼저 증가시켜 음수가 되지 않게 함
        let depth = self.queue_depth.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(frame).is_err() {
            self.queue_depth.fetch_sub(1, Ordering::Relaxed);
            return Err(IngestError::QueueClosed);
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::INGEST_FRAMES_ENQUEUED_TOTAL).increment(1);
        metrics::gauge!(m::INGEST_QUEUE_DEPTH).set(depth as f64);
        Ok(())
    }

    /// 현재 큐 깊이
    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// 큐가 닫혔는지 여부
    pub fn is_closed(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// 수집 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use packethunter_pipeline::{IngestionPipelineBuilder, MemoryStore};
///
/// let store = Arc::new(MemoryStore::new());
/// let mut pipeline = IngestionPipelineBuilder::new()
///     .config(config)
///     .store(store)
///     .build()?;
///
/// pipeline.start().await?;
/// pipeline.handle().enqueue(frame)?;
/// ```
pub struct IngestionPipeline {
    config: IngestConfig,
    state: PipelineState,
    decoder: Arc<dyn FrameDecoder>,
    packet_store: Arc<dyn PacketStore>,
    rule_store: Option<Arc<dyn RuleStore>>,
    attribution: Arc<dyn Attribution>,
    session: Arc<SessionState>,
    stats: Arc<StatsEngine>,
    handle: IngestHandle,
    frame_rx: Option<mpsc::UnboundedReceiver<RawFrame>>,
    counters: Arc<IngestCounters>,
    dispatcher: AlertDispatcher,
    cancel: CancellationToken,
    consumer: Option<JoinHandle<()>>,
    /// 통계/귀속 타이머 태스크
    tasks: Vec<JoinHandle<()>>,
    rule_count: usize,
}

impl IngestionPipeline {
    /// 빌더를 생성합니다.
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::new()
    }

    /// 현재 상태를 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 큐 투입 핸들
    pub fn handle(&self) -> IngestHandle {
        self.handle.clone()
    }

    /// 최신 통계 스냅샷
    pub fn snapshot(&self) -> CaptureStats {
        self.stats.snapshot()
    }

    /// 링 버퍼 내용 (최신이 마지막)
    pub fn recent_packets(&self) -> Vec<ParsedPacket> {
        self.session.recent_packets()
    }

    /// 현재 큐 깊이
    pub fn queue_depth(&self) -> u64 {
        self.handle.queue_depth()
    }

    /// 처리된 패킷 수
    pub fn processed_count(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    /// 큐에 들어간 프레임 수
    pub fn enqueued_count(&self) -> u64 {
        self.counters.enqueued.load(Ordering::Relaxed)
    }

    /// 패킷 저장 실패 수
    pub fn storage_failure_count(&self) -> u64 {
        self.counters.storage_failures.load(Ordering::Relaxed)
    }

    /// 분석 도중 패닉으로 건너뛴 프레임 수
    pub fn panic_count(&self) -> u64 {
        self.counters.processing_panics.load(Ordering::Relaxed)
    }

    /// 전달된 알림 수
    pub fn alert_count(&self) -> u64 {
        self.dispatcher.dispatched_count()
    }

    /// 시작 시 로드된 사용자 정의 규칙 수
    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// 소유자별 상위 트래픽
    pub fn app_talkers(&self, limit: usize) -> Vec<AppTalker> {
        self.attribution.app_talkers(limit)
    }

    /// 세션 상태 (통계 엔진과 공유)
    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// consumer 태스크가 살아 있는지 여부
    pub fn is_consuming(&self) -> bool {
        self.consumer.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 통계를 즉시 재계산합니다.
    pub async fn refresh_stats(&self) -> bool {
        self.stats.recompute(Instant::now()).await
    }

    async fn load_rules(&self) -> Vec<CustomRule> {
        let Some(store) = &self.rule_store else {
            return Vec::new();
        };
        match store.enabled_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load custom rules, continuing without them");
                Vec::new()
            }
        }
    }
}

impl Pipeline for IngestionPipeline {
    async fn start(&mut self) -> Result<(), PacketHunterError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        let Some(frame_rx) = self.frame_rx.take() else {
            return Err(PipelineError::InitFailed(
                "ingestion queue already consumed by a previous run".to_owned(),
            )
            .into());
        };

        tracing::info!(decoder = self.decoder.name(), "starting ingestion pipeline");
        self.stats.mark_started();

        // 1. 규칙 로드 (실패해도 계속)
        let rules = self.load_rules().await;
        let engine = DetectionEngine::new(&self.config.detection, rules);
        self.rule_count = engine.custom_rule_count();

        // 2. consumer 태스크
        let consumer = Consumer {
            adapter: ParserAdapter::new(Arc::clone(&self.decoder)),
            engine,
            session: Arc::clone(&self.session),
            packet_store: Arc::clone(&self.packet_store),
            attribution: Arc::clone(&self.attribution),
            dispatcher: self.dispatcher.clone(),
            counters: Arc::clone(&self.counters),
            queue_depth: Arc::clone(&self.handle.queue_depth),
            stats_log_every: self.config.stats_log_every,
        };
        self.consumer = Some(tokio::spawn(consumer.run(frame_rx, self.cancel.clone())));

        // 3. 통계 타이머
        self.tasks.push(
            Arc::clone(&self.stats).spawn(self.config.stats_interval(), self.cancel.clone()),
        );

        // 4. 귀속 갱신 타이머
        if let Some(period) = self.config.attribution_refresh() {
            let attribution = Arc::clone(&self.attribution);
            let cancel = self.cancel.clone();
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = attribution.refresh().await {
                                tracing::debug!(error = %e, "attribution refresh failed");
                            }
                        }
                    }
                }
            }));
        }

        self.state = PipelineState::Running;
        tracing::info!(
            rules = self.rule_count,
            ring_capacity = self.config.ring_capacity,
            window_secs = self.config.window_secs,
            "ingestion pipeline started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PacketHunterError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!(
            queue_depth = self.queue_depth(),
            processed = self.processed_count(),
            "stopping ingestion pipeline"
        );

        // 완료를 기다리지 않음
        self.cancel.cancel();
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }

        // 남은 프레임은 처리되지 않고 버려짐
        self.handle.stopped.store(true, Ordering::Release);
        self.handle.queue_depth.store(0, Ordering::Relaxed);
        metrics::gauge!(m::INGEST_QUEUE_DEPTH).set(0.0);

        self.state = PipelineState::Stopped;
        tracing::info!("ingestion pipeline stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if !self.is_consuming() {
                    return HealthStatus::Unhealthy("consumer task exited".to_owned());
                }
                let depth = self.queue_depth();
                if depth > QUEUE_DEPTH_DEGRADED {
                    HealthStatus::Degraded(format!("ingestion backlog: {depth} frames"))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 단일 consumer 태스크 상태
struct Consumer {
    adapter: ParserAdapter,
    engine: DetectionEngine,
    session: Arc<SessionState>,
    packet_store: Arc<dyn PacketStore>,
    attribution: Arc<dyn Attribution>,
    dispatcher: AlertDispatcher,
    counters: Arc<IngestCounters>,
    queue_depth: Arc<AtomicU64>,
    stats_log_every: u64,
}

impl Consumer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RawFrame>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(frame) => self.process_isolated(&frame),
                    None => break,
                },
            }
        }
        // 세션 종료 시 SNI 맵 등 탐지 상태를 버림
        self.engine.reset();
        tracing::debug!(
            parsed = self.adapter.parsed_count(),
            parse_failures = self.adapter.parse_failures(),
            "ingestion consumer stopped"
        );
    }

    /// 프레임 하나를 처리합니다. 분석 도중의 패닉은 그 프레임만 건너뜁니다.
    fn process_isolated(&mut self, frame: &[u8]) {
        // stop()이 깊이를 0으로 되돌린 뒤에도 음수로 넘어가지 않게 함
        let previous = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .unwrap_or_else(|d| d);
        let depth = previous.saturating_sub(1);
        metrics::gauge!(m::INGEST_QUEUE_DEPTH).set(depth as f64);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(frame, depth)));
        if let Err(payload) = outcome {
            self.counters.processing_panics.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::INGEST_PROCESSING_PANICS_TOTAL).increment(1);
            tracing::warn!(
                frame_len = frame.len(),
                panic = panic_message(payload.as_ref()),
                "frame analysis panicked, skipping frame"
            );
        }
    }

    fn process(&mut self, frame: &[u8], depth: u64) {
        let started = StdInstant::now();
        let Some(packet) = self.adapter.parse(frame) else {
            return;
        };
        let now = Instant::now();

        // a. 저장 (fire-and-forget)
        let store = Arc::clone(&self.packet_store);
        let counters = Arc::clone(&self.counters);
        let stored = packet.clone();
        tokio::spawn(async move {
            let packet_id = stored.id;
            if let Err(e) = store.insert_packet(stored).await {
                counters.storage_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::INGEST_STORAGE_FAILURES_TOTAL).increment(1);
                tracing::debug!(packet_id, error = %e, "failed to persist packet");
            }
        });

        // b-d. 링 버퍼, 누적 카운터, 슬라이딩 윈도우
        self.session.record(&packet, now);

        // e. 프로세스 귀속
        match self.attribution.resolve(
            packet.src_ip,
            packet.src_port,
            packet.dst_ip,
            packet.dst_port,
        ) {
            Ok(Some(owner)) => self.attribution.record(
                &owner,
                packet.direction,
                packet.length as u64,
                packet.remote_ip(),
                &packet.protocol,
            ),
            Ok(None) => {}
            Err(e) => {
                self.counters.attribution_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(packet_id = packet.id, error = %e, "attribution unavailable");
            }
        }

        // f. 탐지
        for alert in self.engine.evaluate(&packet, now) {
            // 저장 태스크는 기다리지 않음
            drop(self.dispatcher.dispatch(alert));
        }

        let processed = self.counters.processed.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::counter!(m::INGEST_PACKETS_PROCESSED_TOTAL).increment(1);
        metrics::histogram!(m::INGEST_PROCESSING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if processed % DETECTION_CLEANUP_EVERY == 0 {
            self.engine.cleanup_stale(now);
        }

        if self.stats_log_every > 0 && processed % self.stats_log_every == 0 {
            let rates = self.session.rates(now);
            tracing::debug!(
                total_packets = self.session.total_packets(),
                total_bytes = self.session.total_bytes(),
                packets_per_second = rates.packets_per_second,
                bytes_per_second = rates.bytes_per_second,
                queue_depth = depth,
                "ingestion stats"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// 수집 파이프라인 빌더
///
/// 저장소는 필수이고, 디코더는 [`EtherparseDecoder`], 귀속은 [`NoAttribution`]이 기본입니다.
pub struct IngestionPipelineBuilder {
    config: IngestConfig,
    decoder: Option<Arc<dyn FrameDecoder>>,
    packet_store: Option<Arc<dyn PacketStore>>,
    alert_store: Option<Arc<dyn AlertStore>>,
    rule_store: Option<Arc<dyn RuleStore>>,
    attribution: Option<Arc<dyn Attribution>>,
    sink: Option<Arc<dyn LiveSink>>,
}

impl IngestionPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: IngestConfig::default(),
            decoder: None,
            packet_store: None,
            alert_store: None,
            rule_store: None,
            attribution: None,
            sink: None,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn FrameDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn packet_store(mut self, store: Arc<dyn PacketStore>) -> Self {
        self.packet_store = Some(store);
        self
    }

    pub fn alert_store(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.alert_store = Some(store);
        self
    }

    pub fn rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.rule_store = Some(store);
        self
    }

    /// 패킷/알림/규칙 저장소를 한 구현으로 지정합니다.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: PacketStore + AlertStore + RuleStore + 'static,
    {
        self.packet_store(store.clone())
            .alert_store(store.clone())
            .rule_store(store)
    }

    pub fn attribution(mut self, attribution: Arc<dyn Attribution>) -> Self {
        self.attribution = Some(attribution);
        self
    }

    /// 실시간 구독자 전송을 지정합니다.
    pub fn live_sink(mut self, sink: Arc<dyn LiveSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// # Errors
    /// - 설정 검증 실패
    /// - 패킷 또는 알림 저장소 미지정
    pub fn build(self) -> Result<IngestionPipeline, IngestError> {
        self.config.validate()?;

        let packet_store = self
            .packet_store
            .ok_or(IngestError::MissingCollaborator("packet store"))?;
        let alert_store = self
            .alert_store
            .ok_or(IngestError::MissingCollaborator("alert store"))?;
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(EtherparseDecoder::new()));
        let attribution = self.attribution.unwrap_or_else(|| Arc::new(NoAttribution));

        let (tx, frame_rx) = mpsc::unbounded_channel();
        let queue_depth = Arc::new(AtomicU64::new(0));
        let counters = Arc::new(IngestCounters::default());

        let session = Arc::new(SessionState::new(
            self.config.ring_capacity,
            self.config.window(),
        ));
        let stats = Arc::new(StatsEngine::new(
            Arc::clone(&session),
            Arc::clone(&packet_store),
            self.sink.clone(),
            Arc::clone(&queue_depth),
            self.config.top_talkers_limit,
        ));
        let dispatcher = AlertDispatcher::new(alert_store, self.sink);

        Ok(IngestionPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            decoder,
            packet_store,
            rule_store: self.rule_store,
            attribution,
            session,
            stats,
            handle: IngestHandle {
                tx,
                queue_depth,
                counters: Arc::clone(&counters),
                stopped: Arc::new(AtomicBool::new(false)),
            },
            frame_rx: Some(frame_rx),
            counters,
            dispatcher,
            cancel: CancellationToken::new(),
            consumer: None,
            tasks: Vec::new(),
            rule_count: 0,
        })
    }
}

impl Default for IngestionPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfigBuilder;
    use crate::memory::MemoryStore;
    use bytes::Bytes;

    fn build(store: Arc<MemoryStore>) -> IngestionPipeline {
        IngestionPipelineBuilder::new()
            .config(IngestConfigBuilder::new().attribution_refresh_secs(0).build().unwrap())
            .store(store)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_stores() {
        let result = IngestionPipelineBuilder::new().build();
        assert!(matches!(result, Err(IngestError::MissingCollaborator(_))));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let mut config = IngestConfig::default();
        config.window_secs = 0;
        let result = IngestionPipelineBuilder::new()
            .config(config)
            .store(Arc::new(MemoryStore::new()))
            .build();
        assert!(matches!(result, Err(IngestError::Config { .. })));
    }

    #[test]
    fn builder_creates_pipeline() {
        let pipeline = build(Arc::new(MemoryStore::new()));
        assert_eq!(pipeline.state_name(), "initialized");
        assert_eq!(pipeline.queue_depth(), 0);
        assert_eq!(pipeline.processed_count(), 0);
        assert!(pipeline.recent_packets().is_empty());
    }

    #[tokio::test]
    async fn lifecycle() {
        let mut pipeline = build(Arc::new(MemoryStore::new()));
        assert!(pipeline.health_check().await.is_unhealthy());
        assert!(pipeline.stop().await.is_err());

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state_name(), "running");
        assert!(pipeline.health_check().await.is_healthy());
        assert!(pipeline.start().await.is_err());

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");
        assert!(pipeline.health_check().await.is_unhealthy());

        // 큐는 한 번만 소비할 수 있음
        assert!(pipeline.start().await.is_err());
    }

    #[tokio::test]
    async fn enqueue_before_start_is_buffered() {
        let pipeline = build(Arc::new(MemoryStore::new()));
        let handle = pipeline.handle();
        handle.enqueue(Bytes::from_static(b"frame")).unwrap();
        assert_eq!(handle.queue_depth(), 1);
        assert_eq!(pipeline.enqueued_count(), 1);
    }

    #[tokio::test]
    async fn enqueue_after_stop_fails() {
        let mut pipeline = build(Arc::new(MemoryStore::new()));
        let handle = pipeline.handle();
        pipeline.start().await.unwrap();
        pipeline.stop().await.unwrap();

        // abort된 consumer가 수신측을 놓을 때까지 양보
        for _ in 0..10 {
            if handle.is_closed() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            handle.enqueue(Bytes::from_static(b"late")),
            Err(IngestError::QueueClosed)
        ));
        assert_eq!(handle.queue_depth(), 0);
    }

    #[tokio::test]
    async fn stop_discards_undrained_depth() {
        let mut pipeline = build(Arc::new(MemoryStore::new()));
        let handle = pipeline.handle();
        for _ in 0..3 {
            handle.enqueue(Bytes::from_static(b"frame")).unwrap();
        }
        // consumer가 돌기 전에 바로 정지
        pipeline.start().await.unwrap();
        pipeline.stop().await.unwrap();

        assert_eq!(pipeline.queue_depth(), 0);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.enqueue(Bytes::from_static(b"late")),
            Err(IngestError::QueueClosed)
        ));
        assert_eq!(pipeline.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_clock_starts_at_start() {
        let mut pipeline = build(Arc::new(MemoryStore::new()));
        tokio::time::advance(std::time::Duration::from_secs(2)).await;

        let before = std::time::SystemTime::now();
        pipeline.start().await.unwrap();
        assert!(pipeline.snapshot().start_time >= before);
        assert!(pipeline.session().start_time() >= before);
        // 시작 직후에는 재계산을 건너뜀
        assert!(!pipeline.refresh_stats().await);

        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn rule_load_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_queries(true);
        let mut pipeline = build(store);
        pipeline.start().await.unwrap();
        assert_eq!(pipeline.rule_count(), 0);
        pipeline.stop().await.unwrap();
    }
}
