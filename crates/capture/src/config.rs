//! 포워드 루프 설정
//!
//! core의 [`CaptureConfig`]에서 포워드 스레드가 쓰는 값만 추려 냅니다.

use std::time::Duration;

use packethunter_core::config::CaptureConfig;
use packethunter_core::error::{ConfigError, PacketHunterError};

/// 한 번에 읽을 수 있는 최대 프레임 크기
pub const MAX_BUFFER_SIZE: usize = 65_535;

/// 포워드 루프 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardConfig {
    /// 로그와 상태 표시에 쓰는 인터페이스 이름
    pub interface_name: String,
    /// 읽기 버퍼 크기 (바이트)
    pub buffer_size: usize,
    /// 읽을 데이터가 없을 때 대기 시간 (밀리초)
    pub idle_sleep_ms: u64,
    /// 포워드 스레드 우선순위 상향 요청 여부
    pub raise_priority: bool,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self::from_core(&CaptureConfig::default())
    }
}

impl ForwardConfig {
    pub fn from_core(capture: &CaptureConfig) -> Self {
        Self {
            interface_name: capture.interface_name.clone(),
            buffer_size: capture.buffer_size,
            idle_sleep_ms: capture.idle_sleep_ms,
            raise_priority: capture.raise_priority,
        }
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn validate(&self) -> Result<(), PacketHunterError> {
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "capture.buffer_size".to_owned(),
                reason: format!("must be 1-{MAX_BUFFER_SIZE}"),
            }
            .into());
        }
        if self.interface_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "capture.interface_name".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// 포워드 설정 빌더
#[derive(Default)]
pub struct ForwardConfigBuilder {
    config: ForwardConfig,
}

impl ForwardConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interface_name(mut self, name: impl Into<String>) -> Self {
        self.config.interface_name = name.into();
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn idle_sleep_ms(mut self, ms: u64) -> Self {
        self.config.idle_sleep_ms = ms;
        self
    }

    pub fn raise_priority(mut self, raise: bool) -> Self {
        self.config.raise_priority = raise;
        self
    }

    /// 설정을 검증하고 `ForwardConfig`를 생성합니다.
    pub fn build(self) -> Result<ForwardConfig, PacketHunterError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
