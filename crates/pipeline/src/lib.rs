#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`adapter`]: 외부 디코더 호출 경계 (패킷 ID, 캡처 시각, 방향 부여)
//! - [`decoder`]: etherparse 기반 기본 IP 프레임 디코더
//! - [`buffer`]: 고정 용량 최근 패킷 링 버퍼
//! - [`window`]: 시간 기반 슬라이딩 윈도우
//! - [`stats`]: 세션 상태와 주기적 통계 스냅샷
//! - [`detector`]: 인증서 지문 변경, 대량 송신, 사용자 정의 임계값 탐지
//! - [`alert`]: 알림 생성과 저장/실시간 전달
//! - [`rule`]: YAML 사용자 정의 규칙 로더
//! - [`attribution`]: 트래픽 → 프로세스 귀속
//! - [`memory`]: 인메모리 패킷/알림/규칙 저장소
//! - [`sink`]: broadcast 채널 기반 실시간 구독자 전송
//! - [`pipeline`]: 수집 큐와 단일 consumer (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! enqueue -> unbounded queue -> ParserAdapter -> SessionState + DetectionEngine -> AlertDispatcher
//!                                    |                 |                               |
//!                              FrameDecoder       StatsEngine (1s)           AlertStore + LiveSink
//! ```

pub mod adapter;
pub mod alert;
pub mod attribution;
pub mod buffer;
pub mod config;
pub mod decoder;
pub mod detector;
pub mod error;
pub mod memory;
pub mod pipeline;
pub mod rule;
pub mod sink;
pub mod stats;
pub mod window;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{IngestHandle, IngestionPipeline, IngestionPipelineBuilder};

// 설정
pub use config::{DetectionSettings, IngestConfig, IngestConfigBuilder};

// 에러
pub use error::IngestError;

// 탐지
pub use detector::{
    CertificatePinDetector, DetectionEngine, ExfiltrationDetector, ThresholdRuleDetector,
};

// 알림
pub use alert::{AlertDispatcher, new_alert};

// 통계
pub use buffer::RingBuffer;
pub use stats::{SessionState, StatsEngine};
pub use window::{SlidingWindow, WindowRates};

// 협력자 구현
pub use attribution::{NoAttribution, ProcNetAttribution};
pub use decoder::EtherparseDecoder;
pub use memory::MemoryStore;
pub use rule::RuleLoader;
pub use sink::{BroadcastSink, LiveEvent};
