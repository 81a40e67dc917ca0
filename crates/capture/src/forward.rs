//! 포워드 루프 -- 전용 스레드에서 읽기/되쓰기
//!
//! 루프는 프레임을 읽는 즉시 파싱 없이 인터페이스에 다시 쓰고, 쓰기에 성공한
//! 프레임만 복사해 수집 파이프라인에 넘깁니다. 넘기는 작업은 tokio 런타임에
//! 분리된 태스크로 띄우며 루프는 그 결과를 기다리지 않습니다.
//!
//! # 종료 조건
//! - 정지 플래그 (`SessionHandle::stop`)
//! - 스트림 종료 ([`ReadOutcome::Closed`])
//! - 읽기 I/O 에러
//!
//! 프레임 단위 쓰기 실패는 0바이트 포워딩으로 집계하고 루프를 계속합니다.
//! 어떤 경우든 종료 시 인터페이스를 닫고 최종 처리량을 로그로 남깁니다.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::runtime::Handle;

use packethunter_core::metrics as m;
use packethunter_pipeline::IngestHandle;

use crate::config::ForwardConfig;
use crate::tun::{ReadOutcome, TunInterface};

/// 포워드 스레드 이름
pub const FORWARD_THREAD_NAME: &str = "packet-forward";

/// 루프 종료 사유
#[derive(Debug)]
pub enum ForwardExit {
    /// 정지 요청
    Stopped,
    /// 인터페이스 스트림 종료
    EndOfStream,
    /// 읽기 I/O 에러
    Failed(io::Error),
}

impl fmt::Display for ForwardExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Failed(e) => write!(f, "io error: {e}"),
        }
    }
}

/// 포워드 루프 실시간 카운터
///
/// 포워드 스레드만 쓰고, 다른 스레드는 [`ForwardStats::snapshot`]으로 읽습니다.
#[derive(Debug)]
pub struct ForwardStats {
    frames_read: AtomicU64,
    bytes_read: AtomicU64,
    frames_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    write_failures: AtomicU64,
    running: AtomicBool,
    started_at: Instant,
    finished_at: Mutex<Option<Instant>>,
    exit_reason: Mutex<Option<String>>,
}

impl Default for ForwardStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardStats {
    pub fn new() -> Self {
        Self {
            frames_read: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            frames_forwarded: AtomicU64::new(0),
            bytes_forwarded: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            running: AtomicBool::new(true),
            started_at: Instant::now(),
            finished_at: Mutex::new(None),
            exit_reason: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn exit_reason(&self) -> Option<String> {
        self.exit_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn finish(&self, exit: &ForwardExit) {
        *self
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        *self
            .exit_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(exit.to_string());
        self.running.store(false, Ordering::Release);
    }

    /// 현재 카운터를 복사합니다.
    pub fn snapshot(&self) -> ForwardSnapshot {
        let finished_at = *self
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let elapsed = finished_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started_at);

        ForwardSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            elapsed,
            running: self.is_running(),
        }
    }
}

/// 포워드 카운터 스냅샷
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardSnapshot {
    pub frames_read: u64,
    pub bytes_read: u64,
    pub frames_forwarded: u64,
    pub bytes_forwarded: u64,
    pub write_failures: u64,
    pub elapsed: Duration,
    pub running: bool,
}

impl ForwardSnapshot {
    pub fn frames_per_second(&self) -> f64 {
        per_second(self.frames_forwarded, self.elapsed)
    }

    pub fn bytes_per_second(&self) -> f64 {
        per_second(self.bytes_forwarded, self.elapsed)
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// 포워드 루프
pub struct ForwardLoop<I: TunInterface> {
    interface: I,
    config: ForwardConfig,
    ingest: IngestHandle,
    runtime: Handle,
    stop: Arc<AtomicBool>,
    stats: Arc<ForwardStats>,
}

impl<I: TunInterface> ForwardLoop<I> {
    pub fn new(
        interface: I,
        config: ForwardConfig,
        ingest: IngestHandle,
        runtime: Handle,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            interface,
            config,
            ingest,
            runtime,
            stop,
            stats: Arc::new(ForwardStats::new()),
        }
    }

    /// 실시간 카운터 핸들
    pub fn stats(&self) -> Arc<ForwardStats> {
        Arc::clone(&self.stats)
    }

    /// 전용 스레드에서 루프를 시작합니다.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<ForwardExit>> {
        thread::Builder::new()
            .name(FORWARD_THREAD_NAME.to_owned())
            .spawn(move || self.run())
    }

    /// 현재 스레드에서 루프를 실행합니다. 종료할 때까지 반환하지 않습니다.
    pub fn run(mut self) -> ForwardExit {
        if self.config.raise_priority {
            raise_thread_priority();
        }

        tracing::info!(
            interface = self.interface.name(),
            buffer_size = self.config.buffer_size,
            "forward loop started"
        );

        let idle = self.config.idle_sleep();
        let mut buf = vec![0u8; self.config.buffer_size];

        let exit = loop {
            if self.stop.load(Ordering::Acquire) {
                break ForwardExit::Stopped;
            }

            match self.interface.read(&mut buf) {
                Ok(ReadOutcome::Data(n)) => self.forward(&buf[..n]),
                Ok(ReadOutcome::Empty) => thread::sleep(idle),
                Ok(ReadOutcome::Closed) => break ForwardExit::EndOfStream,
                Err(e) => break ForwardExit::Failed(e),
            }
        };

        self.interface.close();
        self.stats.finish(&exit);
        self.log_final(&exit);
        exit
    }

    fn forward(&mut self, frame: &[u8]) {
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_read
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        metrics::counter!(m::FORWARD_FRAMES_READ_TOTAL).increment(1);

        let written = match self.interface.write(frame) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(len = frame.len(), error = %e, "interface write failed");
                0
            }
        };

        if written == 0 {
            self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::FORWARD_WRITE_FAILURES_TOTAL).increment(1);
            return;
        }

        self.stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_forwarded
            .fetch_add(written as u64, Ordering::Relaxed);
        metrics::counter!(m::FORWARD_FRAMES_TOTAL).increment(1);
        metrics::counter!(m::FORWARD_BYTES_TOTAL).increment(written as u64);

        // 분석은 복사본으로, 결과를 기다리지 않음
        let copy = Bytes::copy_from_slice(frame);
        let ingest = self.ingest.clone();
        self.runtime.spawn(async move {
            if let Err(e) = ingest.enqueue(copy) {
                tracing::debug!(error = %e, "frame dispatch dropped");
            }
        });
    }

    fn log_final(&self, exit: &ForwardExit) {
        let snap = self.stats.snapshot();
        let elapsed_secs = snap.elapsed.as_secs_f64();
        if let ForwardExit::Failed(e) = exit {
            tracing::error!(
                interface = self.interface.name(),
                error = %e,
                elapsed_secs,
                frames = snap.frames_forwarded,
                bytes = snap.bytes_forwarded,
                "forward loop terminated by io error"
            );
        }
        tracing::info!(
            interface = self.interface.name(),
            reason = %exit,
            elapsed_secs,
            frames = snap.frames_forwarded,
            bytes = snap.bytes_forwarded,
            frames_per_sec = snap.frames_per_second(),
            bytes_per_sec = snap.bytes_per_second(),
            write_failures = snap.write_failures,
            "forward loop finished"
        );
    }
}

/// 호출 스레드의 스케줄링 우선순위를 최대로 요청합니다.
///
/// 권한이 없으면 기본 우선순위로 계속합니다.
fn raise_thread_priority() {
    #[cfg(unix)]
    {
        // Linux에서 PRIO_PROCESS + 0은 호출 스레드에만 적용됨
        // SAFETY: 인자 검증 외에 메모리 접근 없음
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0, -20) };
        if rc == 0 {
            tracing::debug!("forward thread priority raised");
        } else {
            tracing::debug!(
                error = %io::Error::last_os_error(),
                "forward thread priority not raised"
            );
        }
    }
    #[cfg(not(unix))]
    tracing::debug!("thread priority control unsupported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardConfigBuilder;
    use crate::memory::MemoryInterface;
    use packethunter_core::pipeline::Pipeline;
    use packethunter_pipeline::{IngestConfigBuilder, IngestionPipeline, MemoryStore};

    fn config() -> ForwardConfig {
        ForwardConfigBuilder::new()
            .interface_name("mem0")
            .raise_priority(false)
            .build()
            .unwrap()
    }

    async fn started_pipeline() -> IngestionPipeline {
        let mut pipeline = IngestionPipeline::builder()
            .config(
                IngestConfigBuilder::new()
                    .attribution_refresh_secs(0)
                    .build()
                    .unwrap(),
            )
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        pipeline.start().await.unwrap();
        pipeline
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn end_of_stream_closes_interface() {
        let pipeline = started_pipeline().await;
        let (iface, ctl) = MemoryInterface::new("mem0");
        ctl.inject(vec![0u8; 40]);
        ctl.inject(vec![1u8; 60]);
        ctl.finish();

        let forward = ForwardLoop::new(
            iface,
            config(),
            pipeline.handle(),
            Handle::current(),
            Arc::new(AtomicBool::new(false)),
        );
        let stats = forward.stats();
        let exit = tokio::task::spawn_blocking(move || forward.run())
            .await
            .unwrap();

        assert!(matches!(exit, ForwardExit::EndOfStream));
        assert!(ctl.is_closed());
        assert_eq!(ctl.forwarded_count(), 2);

        let snap = stats.snapshot();
        assert!(!snap.running);
        assert_eq!(snap.frames_read, 2);
        assert_eq!(snap.frames_forwarded, 2);
        assert_eq!(snap.bytes_forwarded, 100);
        assert_eq!(stats.exit_reason().as_deref(), Some("end of stream"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn write_failures_are_counted_and_not_dispatched() {
        let pipeline = started_pipeline().await;
        let (iface, ctl) = MemoryInterface::new("mem0");
        ctl.set_fail_writes(true);
        ctl.inject(vec![0u8; 40]);
        ctl.finish();

        let forward = ForwardLoop::new(
            iface,
            config(),
            pipeline.handle(),
            Handle::current(),
            Arc::new(AtomicBool::new(false)),
        );
        let stats = forward.stats();
        tokio::task::spawn_blocking(move || forward.run())
            .await
            .unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_read, 1);
        assert_eq!(snap.write_failures, 1);
        assert_eq!(snap.frames_forwarded, 0);
        assert_eq!(snap.bytes_forwarded, 0);
        assert_eq!(pipeline.enqueued_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn read_error_terminates_loop() {
        let pipeline = started_pipeline().await;
        let (iface, ctl) = MemoryInterface::new("mem0");
        ctl.fail_next_read(io::ErrorKind::BrokenPipe);

        let forward = ForwardLoop::new(
            iface,
            config(),
            pipeline.handle(),
            Handle::current(),
            Arc::new(AtomicBool::new(false)),
        );
        let exit = tokio::task::spawn_blocking(move || forward.run())
            .await
            .unwrap();

        match exit {
            ForwardExit::Failed(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected exit: {other}"),
        }
        assert!(ctl.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_flag_ends_idle_loop() {
        let pipeline = started_pipeline().await;
        let (iface, ctl) = MemoryInterface::new("mem0");
        let stop = Arc::new(AtomicBool::new(false));

        let forward = ForwardLoop::new(
            iface,
            config(),
            pipeline.handle(),
            Handle::current(),
            Arc::clone(&stop),
        );
        let thread = forward.spawn().unwrap();
        assert_eq!(thread.thread().name(), Some(FORWARD_THREAD_NAME));

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.store(true, Ordering::Release);
        let exit = tokio::task::spawn_blocking(move || thread.join().unwrap())
            .await
            .unwrap();

        assert!(matches!(exit, ForwardExit::Stopped));
        assert!(ctl.is_closed());
    }

    #[test]
    fn rates_are_zero_without_elapsed_time() {
        let snap = ForwardSnapshot {
            frames_read: 10,
            bytes_read: 1000,
            frames_forwarded: 10,
            bytes_forwarded: 1000,
            write_failures: 0,
            elapsed: Duration::ZERO,
            running: false,
        };
        assert_eq!(snap.frames_per_second(), 0.0);

        let snap = ForwardSnapshot {
            elapsed: Duration::from_secs(2),
            ..snap
        };
        assert_eq!(snap.frames_per_second(), 5.0);
        assert_eq!(snap.bytes_per_second(), 500.0);
    }
}
