//! 설정 관리 -- packethunter.toml 파싱 및 런타임 설정
//!
//! [`PacketHunterConfig`]는 모든 크레이트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`PACKETHUNTER_CAPTURE_INTERFACE_NAME=tun1` 형식)
//! 3. 설정 파일 (`packethunter.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), packethunter_core::error::PacketHunterError> {
//! use packethunter_core::config::PacketHunterConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = PacketHunterConfig::load("packethunter.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = PacketHunterConfig::parse("[pipeline]\nring_capacity = 500")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, PacketHunterError};

/// PacketHunter 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacketHunterConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 캡처/포워드 루프 설정
    #[serde(default)]
    pub capture: CaptureConfig,
    /// 수집 파이프라인 및 통계 설정
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// 탐지 엔진 설정
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl PacketHunterConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PacketHunterError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, PacketHunterError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PacketHunterError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                PacketHunterError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, PacketHunterError> {
        toml::from_str(toml_str).map_err(|e| {
            PacketHunterError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `PACKETHUNTER_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "PACKETHUNTER_GENERAL_LOG_LEVEL");
        override_string(
            &mut self.general.log_format,
            "PACKETHUNTER_GENERAL_LOG_FORMAT",
        );

        // Capture
        override_string(
            &mut self.capture.interface_name,
            "PACKETHUNTER_CAPTURE_INTERFACE_NAME",
        );
        override_string(&mut self.capture.address, "PACKETHUNTER_CAPTURE_ADDRESS");
        override_usize(
            &mut self.capture.buffer_size,
            "PACKETHUNTER_CAPTURE_BUFFER_SIZE",
        );
        override_u64(
            &mut self.capture.idle_sleep_ms,
            "PACKETHUNTER_CAPTURE_IDLE_SLEEP_MS",
        );
        override_u32(&mut self.capture.mtu, "PACKETHUNTER_CAPTURE_MTU");
        override_bool(
            &mut self.capture.raise_priority,
            "PACKETHUNTER_CAPTURE_RAISE_PRIORITY",
        );

        // Pipeline
        override_usize(
            &mut self.pipeline.ring_capacity,
            "PACKETHUNTER_PIPELINE_RING_CAPACITY",
        );
        override_u64(
            &mut self.pipeline.stats_interval_ms,
            "PACKETHUNTER_PIPELINE_STATS_INTERVAL_MS",
        );
        override_u64(
            &mut self.pipeline.window_secs,
            "PACKETHUNTER_PIPELINE_WINDOW_SECS",
        );
        override_usize(
            &mut self.pipeline.top_talkers_limit,
            "PACKETHUNTER_PIPELINE_TOP_TALKERS_LIMIT",
        );
        override_u64(
            &mut self.pipeline.stats_log_every,
            "PACKETHUNTER_PIPELINE_STATS_LOG_EVERY",
        );
        override_u64(
            &mut self.pipeline.attribution_refresh_secs,
            "PACKETHUNTER_PIPELINE_ATTRIBUTION_REFRESH_SECS",
        );

        // Detection
        override_bool(
            &mut self.detection.mitm_enabled,
            "PACKETHUNTER_DETECTION_MITM_ENABLED",
        );
        override_bool(
            &mut self.detection.exfil_enabled,
            "PACKETHUNTER_DETECTION_EXFIL_ENABLED",
        );
        override_u64(
            &mut self.detection.exfil_window_secs,
            "PACKETHUNTER_DETECTION_EXFIL_WINDOW_SECS",
        );
        override_u64(
            &mut self.detection.exfil_threshold_bytes,
            "PACKETHUNTER_DETECTION_EXFIL_THRESHOLD_BYTES",
        );
        override_opt_string(
            &mut self.detection.rules_path,
            "PACKETHUNTER_DETECTION_RULES_PATH",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "PACKETHUNTER_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "PACKETHUNTER_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "PACKETHUNTER_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), PacketHunterError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.capture.buffer_size == 0 || self.capture.buffer_size > MAX_BUFFER_SIZE {
            return Err(invalid(
                "capture.buffer_size",
                format!("must be between 1 and {MAX_BUFFER_SIZE}"),
            ));
        }

        if self.capture.interface_name.is_empty() {
            return Err(invalid(
                "capture.interface_name",
                "must not be empty".to_owned(),
            ));
        }

        if self.pipeline.ring_capacity == 0 {
            return Err(invalid(
                "pipeline.ring_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.pipeline.window_secs == 0 {
            return Err(invalid(
                "pipeline.window_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.pipeline.stats_interval_ms == 0 {
            return Err(invalid(
                "pipeline.stats_interval_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.detection.exfil_enabled {
            if self.detection.exfil_window_secs == 0 {
                return Err(invalid(
                    "detection.exfil_window_secs",
                    "must be greater than 0 when exfiltration detection is enabled".to_owned(),
                ));
            }
            if self.detection.exfil_threshold_bytes == 0 {
                return Err(invalid(
                    "detection.exfil_threshold_bytes",
                    "must be greater than 0 when exfiltration detection is enabled".to_owned(),
                ));
            }
        }

        if self.metrics.enabled && self.metrics.listen_addr.is_empty() {
            return Err(invalid(
                "metrics.listen_addr",
                "must not be empty when metrics are enabled".to_owned(),
            ));
        }

        Ok(())
    }
}

/// 단일 프레임 읽기 버퍼 상한 (IPv4 최대 패킷 크기)
const MAX_BUFFER_SIZE: usize = 65_535;

fn invalid(field: &str, reason: String) -> PacketHunterError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 캡처/포워드 루프 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// TUN 인터페이스 이름
    pub interface_name: String,
    /// 인터페이스 주소 (CIDR). 주소 할당은 외부 네트워크 설정이 담당합니다.
    pub address: String,
    /// 인터페이스 MTU
    pub mtu: u32,
    /// 프레임 하나 읽기 버퍼 크기 (바이트)
    pub buffer_size: usize,
    /// 읽을 데이터가 없을 때 대기 시간 (밀리초)
    pub idle_sleep_ms: u64,
    /// 포워드 스레드 스케줄링 우선순위를 올릴지 여부
    pub raise_priority: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface_name: "tun0".to_owned(),
            address: "10.0.0.2/32".to_owned(),
            mtu: 1400,
            buffer_size: 32_767,
            idle_sleep_ms: 1,
            raise_priority: true,
        }
    }
}

/// 수집 파이프라인 및 통계 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 최근 패킷 링 버퍼 용량
    pub ring_capacity: usize,
    /// 통계 재계산 주기 (밀리초)
    pub stats_interval_ms: u64,
    /// 속도 계산 슬라이딩 윈도우 길이 (초)
    pub window_secs: u64,
    /// 상위 통신 IP 개수
    pub top_talkers_limit: usize,
    /// N개 패킷마다 통계 로그를 남깁니다 (0이면 끔)
    pub stats_log_every: u64,
    /// 프로세스 귀속 소스 갱신 주기 (초, 0이면 끔)
    pub attribution_refresh_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1000,
            stats_interval_ms: 1000,
            window_secs: 5,
            top_talkers_limit: 10,
            stats_log_every: 100,
            attribution_refresh_secs: 2,
        }
    }
}

/// 탐지 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// 인증서 지문 변경(MITM) 탐지
    pub mitm_enabled: bool,
    /// 대량 송신(유출) 탐지
    pub exfil_enabled: bool,
    /// 유출 탐지 윈도우 (초)
    pub exfil_window_secs: u64,
    /// 유출 탐지 임계값 (바이트, 초과 시 알림)
    pub exfil_threshold_bytes: u64,
    /// 사용자 정의 규칙 YAML 파일 경로
    pub rules_path: Option<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mitm_enabled: true,
            exfil_enabled: true,
            exfil_window_secs: 10,
            exfil_threshold_bytes: 1_000_000,
            rules_path: None,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// exporter 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 바인드 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_opt_string(target: &mut Option<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = if val.is_empty() { None } else { Some(val) };
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}
