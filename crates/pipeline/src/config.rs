//! 수집 파이프라인 설정
//!
//! [`IngestConfig`]는 core의 [`PipelineConfig`](packethunter_core::config::PipelineConfig)와
//! [`DetectionConfig`](packethunter_core::config::DetectionConfig)를 합쳐
//! 파이프라인 내부에서 쓰는 형태로 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use packethunter_core::config::PacketHunterConfig;
//! use packethunter_pipeline::config::IngestConfig;
//!
//! let core_config = PacketHunterConfig::default();
//! let config = IngestConfig::from_core(&core_config.pipeline, &core_config.detection);
//! ```

use std::time::Duration;

use packethunter_core::config::{DetectionConfig, PipelineConfig};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// 통계 재계산을 건너뛰는 최소 세션 경과 시간
pub const MIN_STATS_ELAPSED: Duration = Duration::from_millis(100);

/// 탐지 엔진 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// 인증서 지문 변경 탐지
    pub mitm_enabled: bool,
    /// 대량 송신 탐지
    pub exfil_enabled: bool,
    /// 대량 송신 윈도우 (초)
    pub exfil_window_secs: u64,
    /// 대량 송신 임계값 (바이트)
    pub exfil_threshold_bytes: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            mitm_enabled: true,
            exfil_enabled: true,
            exfil_window_secs: 10,
            exfil_threshold_bytes: 1_000_000,
        }
    }
}

impl DetectionSettings {
    /// core 탐지 설정에서 생성합니다.
    pub fn from_core(core: &DetectionConfig) -> Self {
        Self {
            mitm_enabled: core.mitm_enabled,
            exfil_enabled: core.exfil_enabled,
            exfil_window_secs: core.exfil_window_secs,
            exfil_threshold_bytes: core.exfil_threshold_bytes,
        }
    }

    pub fn exfil_window(&self) -> Duration {
        Duration::from_secs(self.exfil_window_secs)
    }
}

/// 수집 파이프라인 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// 최근 패킷 링 버퍼 용량
    pub ring_capacity: usize,
    /// 통계 재계산 주기 (밀리초)
    pub stats_interval_ms: u64,
    /// 슬라이딩 윈도우 길이 (초)
    pub window_secs: u64,
    /// 상위 통신 IP 개수
    pub top_talkers_limit: usize,
    /// N개 패킷마다 통계 로그 (0이면 끔)
    pub stats_log_every: u64,
    /// 귀속 소스 갱신 주기 (초, 0이면 끔)
    pub attribution_refresh_secs: u64,
    /// 탐지 엔진 설정
    pub detection: DetectionSettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1000,
            stats_interval_ms: 1000,
            window_secs: 5,
            top_talkers_limit: 10,
            stats_log_every: 100,
            attribution_refresh_secs: 2,
            detection: DetectionSettings::default(),
        }
    }
}

impl IngestConfig {
    /// core 설정 섹션에서 파이프라인 설정을 생성합니다.
    pub fn from_core(pipeline: &PipelineConfig, detection: &DetectionConfig) -> Self {
        Self {
            ring_capacity: pipeline.ring_capacity,
            stats_interval_ms: pipeline.stats_interval_ms,
            window_secs: pipeline.window_secs,
            top_talkers_limit: pipeline.top_talkers_limit,
            stats_log_every: pipeline.stats_log_every,
            attribution_refresh_secs: pipeline.attribution_refresh_secs,
            detection: DetectionSettings::from_core(detection),
        }
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// 귀속 갱신 주기. 0이면 `None`
    pub fn attribution_refresh(&self) -> Option<Duration> {
        (self.attribution_refresh_secs > 0)
            .then(|| Duration::from_secs(self.attribution_refresh_secs))
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IngestError> {
        const MAX_RING_CAPACITY: usize = 1_000_000;

        if self.ring_capacity == 0 || self.ring_capacity > MAX_RING_CAPACITY {
            return Err(IngestError::Config {
                field: "ring_capacity".to_owned(),
                reason: format!("must be 1-{MAX_RING_CAPACITY}"),
            });
        }

        if self.stats_interval_ms == 0 {
            return Err(IngestError::Config {
                field: "stats_interval_ms".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.window_secs == 0 {
            return Err(IngestError::Config {
                field: "window_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.detection.exfil_enabled && self.detection.exfil_window_secs == 0 {
            return Err(IngestError::Config {
                field: "detection.exfil_window_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }
}

/// 파이프라인 설정 빌더
#[derive(Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.config.ring_capacity = capacity;
        self
    }

    pub fn stats_interval_ms(mut self, ms: u64) -> Self {
        self.config.stats_interval_ms = ms;
        self
    }

    pub fn window_secs(mut self, secs: u64) -> Self {
        self.config.window_secs = secs;
        self
    }

    pub fn top_talkers_limit(mut self, limit: usize) -> Self {
        self.config.top_talkers_limit = limit;
        self
    }

    pub fn stats_log_every(mut self, every: u64) -> Self {
        self.config.stats_log_every = every;
        self
    }

    pub fn attribution_refresh_secs(mut self, secs: u64) -> Self {
        self.config.attribution_refresh_secs = secs;
        self
    }

    pub fn detection(mut self, detection: DetectionSettings) -> Self {
        self.config.detection = detection;
        self
    }

    /// 설정을 검증하고 `IngestConfig`를 생성합니다.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        IngestConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_preserves_values() {
        let pipeline = PipelineConfig {
            ring_capacity: 50,
            window_secs: 3,
            ..Default::default()
        };
        let detection = DetectionConfig {
            exfil_threshold_bytes: 10,
            ..Default::default()
        };
        let config = IngestConfig::from_core(&pipeline, &detection);
        assert_eq!(config.ring_capacity, 50);
        assert_eq!(config.window(), Duration::from_secs(3));
        assert_eq!(config.detection.exfil_threshold_bytes, 10);
        assert_eq!(config.top_talkers_limit, 10);
    }

    #[test]
    fn attribution_refresh_zero_disables() {
        let config = IngestConfigBuilder::new()
            .attribution_refresh_secs(0)
            .build()
            .unwrap();
        assert!(config.attribution_refresh().is_none());
        assert_eq!(
            IngestConfig::default().attribution_refresh(),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn builder_rejects_zero_ring_capacity() {
        assert!(IngestConfigBuilder::new().ring_capacity(0).build().is_err());
    }

    #[test]
    fn builder_rejects_zero_window() {
        assert!(IngestConfigBuilder::new().window_secs(0).build().is_err());
    }

    #[test]
    fn exfil_window_only_checked_when_enabled() {
        let detection = DetectionSettings {
            exfil_enabled: false,
            exfil_window_secs: 0,
            ..Default::default()
        };
        IngestConfigBuilder::new().detection(detection).build().unwrap();
    }
}
