//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `packethunter_`
//! - 경로: `forward_` (포워드 루프), `ingest_` (수집 파이프라인), `stats_`, `detection_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 알림 종류 레이블 키 (mitm, data_exfil, custom_rule)
pub const LABEL_KIND: &str = "kind";

/// 심각도 레이블 키 (info, low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

// ─── Forward Loop 메트릭 ────────────────────────────────────────────

/// Forward: 인터페이스에서 읽은 프레임 수 (counter)
pub const FORWARD_FRAMES_READ_TOTAL: &str = "packethunter_forward_frames_read_total";

/// Forward: 되쓰기에 성공한 프레임 수 (counter)
pub const FORWARD_FRAMES_TOTAL: &str = "packethunter_forward_frames_total";

/// Forward: 되쓰기한 바이트 수 (counter)
pub const FORWARD_BYTES_TOTAL: &str = "packethunter_forward_bytes_total";

/// Forward: 되쓰기 실패 수 (counter)
pub const FORWARD_WRITE_FAILURES_TOTAL: &str = "packethunter_forward_write_failures_total";

// ─── Ingestion Pipeline 메트릭 ──────────────────────────────────────

/// Ingest: 큐에 들어간 프레임 수 (counter)
pub const INGEST_FRAMES_ENQUEUED_TOTAL: &str = "packethunter_ingest_frames_enqueued_total";

/// Ingest: 큐 깊이 (gauge)
pub const INGEST_QUEUE_DEPTH: &str = "packethunter_ingest_queue_depth";

/// Ingest: 분석까지 끝난 패킷 수 (counter)
pub const INGEST_PACKETS_PROCESSED_TOTAL: &str = "packethunter_ingest_packets_processed_total";

/// Ingest: 파싱 실패로 버려진 프레임 수 (counter)
pub const INGEST_PARSE_FAILURES_TOTAL: &str = "packethunter_ingest_parse_failures_total";

/// Ingest: 저장소 쓰기 실패 수 (counter)
pub const INGEST_STORAGE_FAILURES_TOTAL: &str = "packethunter_ingest_storage_failures_total";

/// Ingest: 분석 도중 패닉이 난 프레임 수 (counter)
pub const INGEST_PROCESSING_PANICS_TOTAL: &str = "packethunter_ingest_processing_panics_total";

/// Ingest: 패킷 하나 처리 지연 시간 (histogram, 초)
pub const INGEST_PROCESSING_DURATION_SECONDS: &str =
    "packethunter_ingest_processing_duration_seconds";

// ─── Statistics 메트릭 ──────────────────────────────────────────────

/// Stats: 초당 패킷 수 (gauge)
pub const STATS_PACKETS_PER_SECOND: &str = "packethunter_stats_packets_per_second";

/// Stats: 초당 바이트 수 (gauge)
pub const STATS_BYTES_PER_SECOND: &str = "packethunter_stats_bytes_per_second";

/// Stats: 누적 패킷 수 (counter)
pub const STATS_PACKETS_TOTAL: &str = "packethunter_stats_packets_total";

/// Stats: 누적 바이트 수 (counter)
pub const STATS_BYTES_TOTAL: &str = "packethunter_stats_bytes_total";

// ─── Detection 메트릭 ───────────────────────────────────────────────

/// Detection: 생성된 알림 수 (counter, labels: kind, severity)
pub const DETECTION_ALERTS_TOTAL: &str = "packethunter_detection_alerts_total";

/// Detection: 알림 저장 실패 수 (counter)
pub const DETECTION_ALERT_STORE_FAILURES_TOTAL: &str =
    "packethunter_detection_alert_store_failures_total";

/// Detection: 로드된 사용자 정의 규칙 수 (gauge)
pub const DETECTION_CUSTOM_RULES_LOADED: &str = "packethunter_detection_custom_rules_loaded";

/// Detection: 추적 중인 SNI 수 (gauge)
pub const DETECTION_TRACKED_SNI: &str = "packethunter_detection_tracked_sni";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "packethunter_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 패킷 처리 지연 시간 히스토그램 버킷 (초)
///
/// 10us ~ 1s 범위. 저장소 쓰기는 fire-and-forget이므로 대부분 하위 버킷에 몰립니다.
pub const PROCESSING_DURATION_BUCKETS: [f64; 9] =
    [0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.1, 1.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다. 일반적으로 `packethunter-daemon`
/// 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Forward Loop
    describe_counter!(
        FORWARD_FRAMES_READ_TOTAL,
        "Total number of frames read from the virtual interface"
    );
    describe_counter!(
        FORWARD_FRAMES_TOTAL,
        "Total number of frames written back onto the virtual interface"
    );
    describe_counter!(FORWARD_BYTES_TOTAL, "Total bytes forwarded");
    describe_counter!(
        FORWARD_WRITE_FAILURES_TOTAL,
        "Total number of frames whose forward write failed"
    );

    // Ingestion Pipeline
    describe_counter!(
        INGEST_FRAMES_ENQUEUED_TOTAL,
        "Total number of frame copies handed to the ingestion queue"
    );
    describe_gauge!(
        INGEST_QUEUE_DEPTH,
        "Frames waiting in the unbounded ingestion queue"
    );
    describe_counter!(
        INGEST_PACKETS_PROCESSED_TOTAL,
        "Total number of packets parsed and analysed"
    );
    describe_counter!(
        INGEST_PARSE_FAILURES_TOTAL,
        "Total number of frames dropped because they could not be parsed"
    );
    describe_counter!(
        INGEST_STORAGE_FAILURES_TOTAL,
        "Total number of failed packet store writes"
    );
    describe_counter!(
        INGEST_PROCESSING_PANICS_TOTAL,
        "Total number of frames whose analysis panicked and was skipped"
    );
    describe_histogram!(
        INGEST_PROCESSING_DURATION_SECONDS,
        "Time to analyse a single packet in seconds"
    );

    // Statistics
    describe_gauge!(
        STATS_PACKETS_PER_SECOND,
        "Packet rate over the sliding window (packets/sec)"
    );
    describe_gauge!(
        STATS_BYTES_PER_SECOND,
        "Byte rate over the sliding window (bytes/sec)"
    );
    describe_counter!(STATS_PACKETS_TOTAL, "Total packets analysed this session");
    describe_counter!(STATS_BYTES_TOTAL, "Total bytes analysed this session");

    // Detection
    describe_counter!(
        DETECTION_ALERTS_TOTAL,
        "Total number of alerts emitted by kind and severity"
    );
    describe_counter!(
        DETECTION_ALERT_STORE_FAILURES_TOTAL,
        "Total number of failed alert store writes"
    );
    describe_gauge!(
        DETECTION_CUSTOM_RULES_LOADED,
        "Number of custom threshold rules loaded"
    );
    describe_gauge!(
        DETECTION_TRACKED_SNI,
        "Number of TLS server names with a pinned certificate fingerprint"
    );

    // Daemon
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        FORWARD_FRAMES_READ_TOTAL,
        FORWARD_FRAMES_TOTAL,
        FORWARD_BYTES_TOTAL,
        FORWARD_WRITE_FAILURES_TOTAL,
        INGEST_FRAMES_ENQUEUED_TOTAL,
        INGEST_QUEUE_DEPTH,
        INGEST_PACKETS_PROCESSED_TOTAL,
        INGEST_PARSE_FAILURES_TOTAL,
        INGEST_STORAGE_FAILURES_TOTAL,
        INGEST_PROCESSING_PANICS_TOTAL,
        INGEST_PROCESSING_DURATION_SECONDS,
        STATS_PACKETS_PER_SECOND,
        STATS_BYTES_PER_SECOND,
        STATS_PACKETS_TOTAL,
        STATS_BYTES_TOTAL,
        DETECTION_ALERTS_TOTAL,
        DETECTION_ALERT_STORE_FAILURES_TOTAL,
        DETECTION_CUSTOM_RULES_LOADED,
        DETECTION_TRACKED_SNI,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("packethunter_"),
                "Metric '{name}' does not start with 'packethunter_' prefix"
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in [
            FORWARD_FRAMES_TOTAL,
            FORWARD_BYTES_TOTAL,
            INGEST_FRAMES_ENQUEUED_TOTAL,
            DETECTION_ALERTS_TOTAL,
        ] {
            assert!(name.ends_with("_total"), "counter '{name}' needs _total");
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn processing_duration_buckets_are_sorted() {
        let buckets = PROCESSING_DURATION_BUCKETS;
        for i in 1..buckets.len() {
            assert!(buckets[i] > buckets[i - 1]);
        }
    }
}
