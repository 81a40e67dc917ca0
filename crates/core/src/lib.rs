#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    AttributionError, CaptureError, ConfigError, PacketHunterError, PipelineError, StorageError,
};

// 설정
pub use config::PacketHunterConfig;

// 파이프라인 trait
pub use pipeline::{
    AlertStore, Attribution, BoxFuture, Detector, FrameDecoder, HealthStatus, LiveSink,
    PacketStore, Pipeline, RuleStore,
};

// 도메인 타입
pub use types::{
    Alert, AlertKind, AppTalker, CaptureStats, CustomRule, DecodedFrame, Direction, IpTalker,
    ParsedPacket, ProtocolDetails, RawFrame, Severity,
};
