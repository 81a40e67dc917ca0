//! 도메인 타입 -- 캡처/분석 경로 전역에서 사용되는 공통 타입
//!
//! 포워딩 경로는 [`RawFrame`]만 다루고, 분석 경로는 [`ParsedPacket`]부터
//! [`Alert`], [`CaptureStats`]까지를 다룹니다.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 인터페이스에서 읽은 원시 프레임
///
/// 포워드 루프는 읽기 버퍼를 재사용하므로, 분석 경로로 넘길 때는 항상
/// 새 버퍼로 복사한 `Bytes`를 넘깁니다.
pub type RawFrame = Bytes;

/// 트래픽 방향
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 장치에서 외부로 나가는 트래픽
    #[default]
    Outbound,
    /// 외부에서 장치로 들어오는 트래픽
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => write!(f, "outbound"),
            Self::Inbound => write!(f, "inbound"),
        }
    }
}

/// 프로토콜별 선택 필드
///
/// 디코더가 페이로드에서 추출할 수 있었던 값만 채워집니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDetails {
    pub http_method: Option<String>,
    pub http_url: Option<String>,
    pub dns_query: Option<String>,
    pub dns_response: Option<String>,
    /// TLS ClientHello의 server name
    pub tls_sni: Option<String>,
    pub tls_cert_fingerprint: Option<String>,
}

/// 디코더 출력
///
/// 외부 프레임 디코더가 반환하는 구조화 레코드입니다. 캡처 시각, 방향,
/// 세션 키, 패킷 ID는 파서 어댑터가 [`ParsedPacket`]으로 변환할 때 붙입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedFrame {
    /// 프로토콜 라벨 (DNS, HTTPS, TCP, ...). 빈 문자열이면 분석 대상이 아닙니다.
    pub protocol: String,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// IP 패킷 전체 길이 (바이트)
    pub length: usize,
    /// TCP 플래그 요약 (예: "SYN,ACK"). 해당 없으면 빈 문자열
    pub flags: String,
    pub details: ProtocolDetails,
}

/// 파싱된 패킷
///
/// 원시 프레임 하나당 한 번 생성되며 이후 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPacket {
    /// 세션 내 단조 증가 ID (알림의 관련 패킷 참조에 사용)
    pub id: u64,
    /// 캡처 시각
    pub timestamp: SystemTime,
    pub protocol: String,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub length: usize,
    pub flags: String,
    pub direction: Direction,
    /// `srcIP:srcPort-dstIP:dstPort`
    pub session_key: String,
    pub details: ProtocolDetails,
}

impl ParsedPacket {
    /// 디코더 출력에 캡처 메타데이터를 붙여 패킷을 만듭니다.
    pub fn from_decoded(
        id: u64,
        decoded: DecodedFrame,
        direction: Direction,
        timestamp: SystemTime,
    ) -> Self {
        let session_key = session_key(
            decoded.src_ip,
            decoded.src_port,
            decoded.dst_ip,
            decoded.dst_port,
        );
        Self {
            id,
            timestamp,
            protocol: decoded.protocol,
            src_ip: decoded.src_ip,
            dst_ip: decoded.dst_ip,
            src_port: decoded.src_port,
            dst_port: decoded.dst_port,
            length: decoded.length,
            flags: decoded.flags,
            direction,
            session_key,
            details: decoded.details,
        }
    }

    /// 원격 호스트 주소 (outbound면 목적지, inbound면 출발지)
    pub fn remote_ip(&self) -> IpAddr {
        match self.direction {
            Direction::Outbound => self.dst_ip,
            Direction::Inbound => self.src_ip,
        }
    }
}

impl fmt::Display for ParsedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} len={} ({})",
            self.id, self.protocol, self.session_key, self.length, self.direction,
        )
    }
}

/// 세션 키를 생성합니다.
pub fn session_key(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> String {
    format!("{src_ip}:{src_port}-{dst_ip}:{dst_port}")
}

/// 알림 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// 인증서 지문 변경 (중간자 공격 의심)
    Mitm,
    /// 단시간 대량 송신
    DataExfiltration,
    /// 사용자 정의 임계값 규칙
    CustomRule,
}

impl AlertKind {
    /// 메트릭 레이블 및 저장용 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mitm => "mitm",
            Self::DataExfiltration => "data_exfil",
            Self::CustomRule => "custom_rule",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 보안 알림
///
/// 탐지 조건이 성립할 때마다 한 번 생성되며 이후 변경되지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// 알림 ID (UUID v4)
    pub id: String,
    pub timestamp: SystemTime,
    pub severity: Severity,
    pub kind: AlertKind,
    pub title: String,
    pub description: String,
    /// 알림을 유발한 패킷의 ID
    pub related_packet_id: Option<u64>,
    pub acknowledged: bool,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.severity, self.title, self.kind, self.description,
        )
    }
}

/// 심각도 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    /// 치명적 -- 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다. 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" | "informational" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 소문자 레이블 (메트릭용)
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// IP별 트래픽 집계
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpTalker {
    pub ip: IpAddr,
    pub packet_count: u64,
    pub bytes: u64,
}

/// 프로세스(소유자)별 트래픽 집계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTalker {
    /// 소유자 식별자 (예: `uid:10123`)
    pub owner: String,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// 서로 다른 원격 호스트 수
    pub remote_hosts: usize,
    pub protocols: Vec<String>,
}

impl AppTalker {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }
}

/// 캡처 통계 스냅샷
///
/// 통계 엔진이 주기적으로 재계산하며, 이전 스냅샷을 통째로 교체합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// 누적 패킷 수 (단조 증가)
    pub total_packets: u64,
    /// 누적 바이트 수 (단조 증가)
    pub total_bytes: u64,
    /// 슬라이딩 윈도우 기준 초당 패킷 수
    pub packets_per_second: f64,
    /// 슬라이딩 윈도우 기준 초당 바이트 수
    pub bytes_per_second: f64,
    /// 프로토콜별 패킷 수 (저장소 조회 결과)
    pub protocol_distribution: BTreeMap<String, u64>,
    /// 상위 통신 IP (저장소 조회 결과)
    pub top_talkers: Vec<IpTalker>,
    /// 재계산 시점의 수집 큐 깊이
    pub queue_depth: u64,
    pub start_time: SystemTime,
    pub last_update: SystemTime,
}

impl CaptureStats {
    /// 세션 시작 시점의 빈 스냅샷
    pub fn empty(start_time: SystemTime) -> Self {
        Self {
            total_packets: 0,
            total_bytes: 0,
            packets_per_second: 0.0,
            bytes_per_second: 0.0,
            protocol_distribution: BTreeMap::new(),
            top_talkers: Vec::new(),
            queue_depth: 0,
            start_time,
            last_update: start_time,
        }
    }
}

/// 사용자 정의 탐지 규칙
///
/// 외부 규칙 저장소에서 로드됩니다. 현재 평가 가능한 조합은
/// `metric = "packet_size"`, `comparison = "greater_than"`뿐입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub metric: String,
    #[serde(default = "default_comparison")]
    pub comparison: String,
    pub threshold: u64,
    /// 평가 윈도우 (초). 패킷 단위 메트릭에서는 사용되지 않습니다.
    #[serde(default)]
    pub window_secs: u64,
    /// 알림 설명에 붙는 동작 이름 (예: "alert", "log")
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub severity: Severity,
}

fn default_enabled() -> bool {
    true
}

fn default_comparison() -> String {
    "greater_than".to_owned()
}

fn default_action() -> String {
    "alert".to_owned()
}
