//! 파이프라인 trait -- 생명주기와 외부 협력자 경계 정의
//!
//! 분석 경로가 의존하는 외부 구성요소(디코더, 저장소, 귀속, 실시간 전송)는
//! 모두 이 모듈의 trait 뒤에 있습니다. 비동기 메서드는 [`BoxFuture`]를 반환하여
//! `Arc<dyn Trait>` 형태로 주입할 수 있습니다.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{AttributionError, PacketHunterError, StorageError};
use crate::types::{
    Alert, AppTalker, CaptureStats, CustomRule, DecodedFrame, Direction, IpTalker, ParsedPacket,
};

/// dyn-compatible trait 메서드용 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 구성요소 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// 정상 동작
    Healthy,
    /// 일부 기능 저하 (사유 포함)
    Degraded(String),
    /// 동작 불가 (사유 포함)
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 시작/정지 생명주기를 가진 구성요소
pub trait Pipeline: Send {
    /// 백그라운드 태스크를 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), PacketHunterError>> + Send;

    /// 백그라운드 태스크를 정지합니다. 진행 중인 작업의 완료를 기다리지 않습니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), PacketHunterError>> + Send;

    /// 현재 건강 상태
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// 원시 프레임 디코더
///
/// 바이트 → 구조화 레코드 변환은 불투명한 외부 함수로 취급합니다.
/// 디코딩할 수 없는 프레임은 `None`을 반환합니다.
pub trait FrameDecoder: Send + Sync {
    /// 디코더 이름
    fn name(&self) -> &str;

    /// 원시 프레임을 디코딩합니다.
    fn decode(&self, frame: &[u8]) -> Option<DecodedFrame>;
}

/// 상태 기반 탐지기
///
/// 수집 파이프라인의 단일 consumer만 호출하므로 `&mut self`로 상태를 갱신합니다.
/// 규칙 평가 시간 외에 대기하면 안 됩니다.
pub trait Detector: Send {
    /// 탐지기 이름
    fn name(&self) -> &str;

    /// 패킷을 평가하여 알림 생성 여부를 결정합니다.
    fn detect(&mut self, packet: &ParsedPacket, now: Instant) -> Option<Alert>;
}

/// 패킷 저장소
pub trait PacketStore: Send + Sync {
    /// 패킷을 저장하고 저장소 ID를 반환합니다.
    fn insert_packet(&self, packet: ParsedPacket) -> BoxFuture<'_, Result<u64, StorageError>>;

    /// 프로토콜별 패킷 수
    fn protocol_distribution(&self) -> BoxFuture<'_, Result<BTreeMap<String, u64>, StorageError>>;

    /// 바이트 기준 상위 통신 IP
    fn top_talkers(&self, limit: usize) -> BoxFuture<'_, Result<Vec<IpTalker>, StorageError>>;
}

/// 알림 저장소
pub trait AlertStore: Send + Sync {
    fn insert_alert(&self, alert: Alert) -> BoxFuture<'_, Result<(), StorageError>>;
}

/// 사용자 정의 규칙 저장소
pub trait RuleStore: Send + Sync {
    /// 활성화된 규칙만 반환합니다.
    fn enabled_rules(&self) -> BoxFuture<'_, Result<Vec<CustomRule>, StorageError>>;
}

/// 트래픽 → 프로세스 귀속
pub trait Attribution: Send + Sync {
    /// 연결 4-튜플의 소유 프로세스를 찾습니다.
    ///
    /// 소스를 읽을 수 없으면 `Err`, 매칭되는 소유자가 없으면 `Ok(None)`입니다.
    fn resolve(
        &self,
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
    ) -> Result<Option<String>, AttributionError>;

    /// 소유자별 트래픽을 기록합니다.
    fn record(
        &self,
        owner: &str,
        direction: Direction,
        bytes: u64,
        remote_host: IpAddr,
        protocol: &str,
    );

    /// 귀속 소스를 다시 읽습니다. 주기 타이머에서 호출됩니다.
    fn refresh(&self) -> BoxFuture<'_, Result<(), AttributionError>>;

    /// 바이트 기준 상위 소유자
    fn app_talkers(&self, limit: usize) -> Vec<AppTalker>;
}

/// 실시간 구독자 전송 (best-effort)
pub trait LiveSink: Send + Sync {
    /// 통계 스냅샷과 최근 패킷 목록을 전송합니다.
    fn publish_snapshot(&self, stats: &CaptureStats, recent: &[ParsedPacket]);

    /// 알림을 전송합니다.
    fn publish_alert(&self, alert: &Alert);
}
