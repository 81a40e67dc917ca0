//! 탐지 로직 -- 패킷 기반 상태 탐지
//!
//! 내장 규칙(인증서 지문 변경, 대량 송신)과 사용자 정의 임계값 규칙을 평가합니다.
//! 각 탐지기는 [`Detector`] trait을 구현하고, [`DetectionEngine`]이 정해진 순서로
//! 호출합니다.
//!
//! # 아키텍처
//! ```text
//! ParsedPacket ──▶ DetectionEngine ──▶ Vec<Alert> ──▶ AlertDispatcher
//!                     │
//!                     ├── CertificatePinDetector (impl Detector)
//!                     ├── ExfiltrationDetector   (impl Detector)
//!                     └── ThresholdRuleDetector  (impl Detector, 규칙당 하나)
//! ```
//!
//! 엔진은 수집 파이프라인의 단일 consumer가 소유하므로 내부 맵에 락이 필요 없습니다.

use std::collections::HashMap;
use std::net::IpAddr;

use tokio::time::Instant;

use packethunter_core::metrics as m;
use packethunter_core::pipeline::Detector;
use packethunter_core::types::{Alert, AlertKind, CustomRule, Direction, ParsedPacket, Severity};

use crate::alert::new_alert;
use crate::config::DetectionSettings;
use crate::window::SlidingWindow;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// =============================================================================
// 인증서 지문 변경 (MITM) 탐지기
// =============================================================================

/// 인증서 지문 변경 탐지기
///
/// 처음 본 SNI의 지문은 신뢰하고(trust-on-first-use), 같은 SNI에 다른 지문이
/// 나타나면 알림을 생성합니다. 지문 맵은 세션 동안 계속 커질 수 있으며
/// 세션 종료 시 엔진과 함께 버려집니다.
#[derive(Debug, Default)]
pub struct CertificatePinDetector {
    fingerprints: HashMap<String, String>,
}

impl CertificatePinDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 추적 중인 SNI 수
    pub fn tracked_count(&self) -> usize {
        self.fingerprints.len()
    }

    /// SNI의 현재 고정 지문
    pub fn pinned(&self, sni: &str) -> Option<&str> {
        self.fingerprints.get(sni).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.fingerprints.clear();
    }
}

impl Detector for CertificatePinDetector {
    fn name(&self) -> &str {
        "mitm"
    }

    fn detect(&mut self, packet: &ParsedPacket, _now: Instant) -> Option<Alert> {
        let sni = packet.details.tls_sni.as_deref()?;
        let fingerprint = packet.details.tls_cert_fingerprint.as_deref()?;

        let previous = self
            .fingerprints
            .insert(sni.to_owned(), fingerprint.to_owned());

        match previous {
            Some(prev) if prev != fingerprint => {
                tracing::warn!(
                    sni,
                    previous = %prev,
                    current = fingerprint,
                    "tls certificate fingerprint changed"
                );
                Some(new_alert(
                    AlertKind::Mitm,
                    Severity::High,
                    "Possible MITM Attack",
                    format!("TLS certificate fingerprint changed for {sni}"),
                    Some(packet.id),
                ))
            }
            _ => None,
        }
    }
}

// =============================================================================
// 대량 송신 (유출) 탐지기
// =============================================================================

/// 대량 송신 탐지기
///
/// 목적지 IP별로 outbound 패킷 크기를 윈도우에 쌓고, 합계가 임계값을 넘으면
/// 알림을 생성한 뒤 해당 목적지의 이력을 비웁니다. 같은 전송이 계속되면
/// 윈도우가 다시 찰 때마다 새 알림이 생깁니다.
#[derive(Debug)]
pub struct ExfiltrationDetector {
    window: std::time::Duration,
    threshold_bytes: u64,
    history: HashMap<IpAddr, SlidingWindow>,
}

impl ExfiltrationDetector {
    pub fn new(window: std::time::Duration, threshold_bytes: u64) -> Self {
        Self {
            window,
            threshold_bytes,
            history: HashMap::new(),
        }
    }

    /// 목적지의 현재 이력 엔트리 수
    pub fn history_len(&self, dest: &IpAddr) -> usize {
        self.history.get(dest).map_or(0, SlidingWindow::len)
    }

    /// 목적지의 현재 윈도우 바이트 합
    pub fn window_bytes(&self, dest: &IpAddr) -> u64 {
        self.history.get(dest).map_or(0, SlidingWindow::byte_count)
    }

    /// 추적 중인 목적지 수
    pub fn tracked_destinations(&self) -> usize {
        self.history.len()
    }

    /// 비어 있는 목적지 엔트리를 제거합니다.
    pub fn cleanup_stale(&mut self, now: Instant) {
        self.history.retain(|_, window| {
            window.prune(now);
            !window.is_empty()
        });
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl Detector for ExfiltrationDetector {
    fn name(&self) -> &str {
        "data_exfil"
    }

    fn detect(&mut self, packet: &ParsedPacket, now: Instant) -> Option<Alert> {
        if packet.direction != Direction::Outbound {
            return None;
        }

        let dest = packet.dst_ip;
        let window = self
            .history
            .entry(dest)
            .or_insert_with(|| SlidingWindow::new(self.window));
        window.record(now, packet.length as u64);
        window.prune(now);

        let total = window.byte_count();
        if total <= self.threshold_bytes {
            return None;
        }

        window.clear();
        tracing::warn!(
            destination = %dest,
            bytes = total,
            window_secs = self.window.as_secs(),
            "outbound volume threshold exceeded"
        );

        Some(new_alert(
            AlertKind::DataExfiltration,
            Severity::Medium,
            "Large Data Transfer",
            format!(
                "Sent {:.2}MB to {dest} in {} seconds",
                total as f64 / BYTES_PER_MB,
                self.window.as_secs()
            ),
            Some(packet.id),
        ))
    }
}

// =============================================================================
// 사용자 정의 임계값 규칙 탐지기
// =============================================================================

/// 평가 가능한 규칙 메트릭
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMetric {
    /// 패킷 길이 (바이트)
    PacketSize,
}

impl RuleMetric {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "packet_size" | "packet_length" => Some(Self::PacketSize),
            _ => None,
        }
    }

    fn value(&self, packet: &ParsedPacket) -> u64 {
        match self {
            Self::PacketSize => packet.length as u64,
        }
    }
}

/// 사용자 정의 임계값 규칙 하나
///
/// `metric(packet) > threshold`이면 규칙의 심각도로 알림을 생성합니다.
#[derive(Debug, Clone)]
pub struct ThresholdRuleDetector {
    rule: CustomRule,
    metric: RuleMetric,
}

impl ThresholdRuleDetector {
    /// 규칙에서 탐지기를 만듭니다. 비활성 규칙이나 지원하지 않는 메트릭/비교는 `None`입니다.
    pub fn from_rule(rule: CustomRule) -> Option<Self> {
        if !rule.enabled {
            return None;
        }
        let Some(metric) = RuleMetric::parse(&rule.metric) else {
            tracing::warn!(
                rule_id = %rule.id,
                metric = %rule.metric,
                "unsupported custom rule metric, skipping"
            );
            return None;
        };
        if !matches!(rule.comparison.as_str(), "greater_than" | ">" | "gt") {
            tracing::warn!(
                rule_id = %rule.id,
                comparison = %rule.comparison,
                "unsupported custom rule comparison, skipping"
            );
            return None;
        }
        Some(Self { rule, metric })
    }
}

impl Detector for ThresholdRuleDetector {
    fn name(&self) -> &str {
        &self.rule.name
    }

    fn detect(&mut self, packet: &ParsedPacket, _now: Instant) -> Option<Alert> {
        let value = self.metric.value(packet);
        if value <= self.rule.threshold {
            return None;
        }
        Some(new_alert(
            AlertKind::CustomRule,
            self.rule.severity,
            self.rule.name.clone(),
            format!("Packet size: {value} - {}", self.rule.action),
            Some(packet.id),
        ))
    }
}

// =============================================================================
// 탐지 엔진
// =============================================================================

/// 탐지 엔진
///
/// 내장 탐지기와 사용자 정의 규칙을 순서대로 평가합니다. 규칙 집합은 생성 시
/// 고정되며, 다시 읽으려면 엔진을 새로 만들어야 합니다.
pub struct DetectionEngine {
    mitm: Option<CertificatePinDetector>,
    exfil: Option<ExfiltrationDetector>,
    custom: Vec<ThresholdRuleDetector>,
}

impl DetectionEngine {
    /// 설정과 규칙 목록으로 엔진을 생성합니다.
    pub fn new(settings: &DetectionSettings, rules: Vec<CustomRule>) -> Self {
        let custom: Vec<_> = rules
            .into_iter()
            .filter_map(ThresholdRuleDetector::from_rule)
            .collect();

        metrics::gauge!(m::DETECTION_CUSTOM_RULES_LOADED).set(custom.len() as f64);
        tracing::info!(
            mitm = settings.mitm_enabled,
            exfil = settings.exfil_enabled,
            custom_rules = custom.len(),
            "detection engine initialized"
        );

        Self {
            mitm: settings.mitm_enabled.then(CertificatePinDetector::new),
            exfil: settings.exfil_enabled.then(|| {
                ExfiltrationDetector::new(settings.exfil_window(), settings.exfil_threshold_bytes)
            }),
            custom,
        }
    }

    /// 패킷을 평가하고 생성된 알림을 반환합니다.
    pub fn evaluate(&mut self, packet: &ParsedPacket, now: Instant) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if let Some(mitm) = self.mitm.as_mut() {
            alerts.extend(mitm.detect(packet, now));
            metrics::gauge!(m::DETECTION_TRACKED_SNI).set(mitm.tracked_count() as f64);
        }
        if let Some(exfil) = self.exfil.as_mut() {
            alerts.extend(exfil.detect(packet, now));
        }
        for rule in &mut self.custom {
            alerts.extend(rule.detect(packet, now));
        }

        alerts
    }

    pub fn mitm(&self) -> Option<&CertificatePinDetector> {
        self.mitm.as_ref()
    }

    pub fn exfiltration(&self) -> Option<&ExfiltrationDetector> {
        self.exfil.as_ref()
    }

    pub fn custom_rule_count(&self) -> usize {
        self.custom.len()
    }

    /// 만료된 추적 데이터를 정리합니다.
    pub fn cleanup_stale(&mut self, now: Instant) {
        if let Some(exfil) = self.exfil.as_mut() {
            exfil.cleanup_stale(now);
        }
    }

    /// 모든 탐지 상태를 비웁니다.
    pub fn reset(&mut self) {
        if let Some(mitm) = self.mitm.as_mut() {
            mitm.clear();
        }
        if let Some(exfil) = self.exfil.as_mut() {
            exfil.clear();
        }
    }
}
