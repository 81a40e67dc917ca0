//! 통계 엔진 -- 세션 상태와 주기적 스냅샷 재계산
//!
//! [`SessionState`]는 consumer가 쓰고 통계 타이머가 읽는 공유 상태입니다.
//! 링 버퍼와 슬라이딩 윈도우는 각각 `Mutex`로, 누적 카운터는 atomic으로 보호합니다.
//!
//! [`StatsEngine`]은 주기마다 [`CaptureStats`]를 새로 만들어 `watch` 채널에
//! 통째로 교체해 넣으므로, 읽는 쪽은 부분 갱신된 스냅샷을 볼 수 없습니다.
//!
//! # 데이터 흐름
//! ```text
//! consumer ──record──▶ SessionState ◀──read── StatsEngine ──send_replace──▶ watch<CaptureStats>
//!                                                  │
//!                                                  ├── PacketStore (분포, 상위 IP)
//!                                                  └── LiveSink (스냅샷 + 최근 패킷)
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use packethunter_core::metrics as m;
use packethunter_core::pipeline::{LiveSink, PacketStore};
use packethunter_core::types::{CaptureStats, ParsedPacket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::buffer::RingBuffer;
use crate::config::MIN_STATS_ELAPSED;
use crate::window::{SlidingWindow, WindowRates};

// =============================================================================
// 세션 상태
// =============================================================================

/// 캡처 세션 동안 누적되는 분석 상태
pub struct SessionState {
    recent: Mutex<RingBuffer<ParsedPacket>>,
    window: Mutex<SlidingWindow>,
    total_packets: AtomicU64,
    total_bytes: AtomicU64,
    /// 세션 시작 시각 (단조 시계, 벽시계)
    started: Mutex<(Instant, SystemTime)>,
}

impl SessionState {
    pub fn new(ring_capacity: usize, window: Duration) -> Self {
        Self {
            recent: Mutex::new(RingBuffer::new(ring_capacity)),
            window: Mutex::new(SlidingWindow::new(window)),
            total_packets: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            started: Mutex::new((Instant::now(), SystemTime::now())),
        }
    }

    /// 세션 시작 시각을 지금으로 기록합니다.
    pub fn mark_started(&self) {
        *lock(&self.started) = (Instant::now(), SystemTime::now());
    }

    /// 파싱된 패킷 하나를 반영합니다 (링 버퍼, 누적 카운터, 윈도우).
    pub fn record(&self, packet: &ParsedPacket, now: Instant) {
        let bytes = packet.length as u64;
        lock(&self.recent).push(packet.clone());
        self.total_packets.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        lock(&self.window).record(now, bytes);
    }

    /// 윈도우를 잘라낸 뒤의 속도
    pub fn rates(&self, now: Instant) -> WindowRates {
        lock(&self.window).rates(now)
    }

    /// 윈도우에 남은 `(패킷 수, 바이트 합)`
    pub fn window_totals(&self, now: Instant) -> (u64, u64) {
        let mut window = lock(&self.window);
        window.prune(now);
        (window.packet_count(), window.byte_count())
    }

    /// 최근 패킷 (최신이 마지막)
    pub fn recent_packets(&self) -> Vec<ParsedPacket> {
        lock(&self.recent).snapshot()
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> Instant {
        lock(&self.started).0
    }

    pub fn start_time(&self) -> SystemTime {
        lock(&self.started).1
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// 통계 엔진
// =============================================================================

/// 통계 스냅샷 재계산기
pub struct StatsEngine {
    state: Arc<SessionState>,
    store: Arc<dyn PacketStore>,
    sink: Option<Arc<dyn LiveSink>>,
    queue_depth: Arc<AtomicU64>,
    top_talkers_limit: usize,
    tx: watch::Sender<CaptureStats>,
}

impl StatsEngine {
    pub fn new(
        state: Arc<SessionState>,
        store: Arc<dyn PacketStore>,
        sink: Option<Arc<dyn LiveSink>>,
        queue_depth: Arc<AtomicU64>,
        top_talkers_limit: usize,
    ) -> Self {
        let (tx, _rx) = watch::channel(CaptureStats::empty(state.start_time()));
        Self {
            state,
            store,
            sink,
            queue_depth,
            top_talkers_limit,
            tx,
        }
    }

    /// 현재 스냅샷의 복사본
    pub fn snapshot(&self) -> CaptureStats {
        self.tx.borrow().clone()
    }

    /// 세션 시작을 기록하고 스냅샷을 빈 상태로 되돌립니다.
    pub fn mark_started(&self) {
        self.state.mark_started();
        self.tx.send_replace(CaptureStats::empty(self.state.start_time()));
    }

    /// 스냅샷 변경 구독
    pub fn subscribe(&self) -> watch::Receiver<CaptureStats> {
        self.tx.subscribe()
    }

    /// 스냅샷을 재계산합니다. 세션 경과가 너무 짧아 건너뛰면 `false`입니다.
    ///
    /// 저장소 조회 실패는 빈 결과로 대체합니다.
    pub async fn recompute(&self, now: Instant) -> bool {
        if now.saturating_duration_since(self.state.started_at()) < MIN_STATS_ELAPSED {
            return false;
        }

        let rates = self.state.rates(now);

        let protocol_distribution = match self.store.protocol_distribution().await {
            Ok(dist) => dist,
            Err(e) => {
                tracing::debug!(error = %e, "protocol distribution query failed");
                BTreeMap::new()
            }
        };
        let top_talkers = match self.store.top_talkers(self.top_talkers_limit).await {
            Ok(talkers) => talkers,
            Err(e) => {
                tracing::debug!(error = %e, "top talkers query failed");
                Vec::new()
            }
        };

        let stats = CaptureStats {
            total_packets: self.state.total_packets(),
            total_bytes: self.state.total_bytes(),
            packets_per_second: rates.packets_per_second,
            bytes_per_second: rates.bytes_per_second,
            protocol_distribution,
            top_talkers,
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            start_time: self.state.start_time(),
            last_update: SystemTime::now(),
        };

        metrics::gauge!(m::STATS_PACKETS_PER_SECOND).set(stats.packets_per_second);
        metrics::gauge!(m::STATS_BYTES_PER_SECOND).set(stats.bytes_per_second);
        metrics::counter!(m::STATS_PACKETS_TOTAL).absolute(stats.total_packets);
        metrics::counter!(m::STATS_BYTES_TOTAL).absolute(stats.total_bytes);

        if let Some(sink) = &self.sink {
            sink.publish_snapshot(&stats, &self.state.recent_packets());
        }
        self.tx.send_replace(stats);
        true
    }

    /// 주기 재계산 태스크를 시작합니다. 토큰이 취소되면 종료합니다.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.recompute(Instant::now()).await;
                    }
                }
            }
            tracing::debug!("stats task stopped");
        })
    }
}
