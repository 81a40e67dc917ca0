//! 수집 파이프라인 에러 타입
//!
//! [`IngestError`]는 파이프라인 구성과 규칙 로딩 단계의 에러를 표현합니다.
//! 프레임 단위 에러(파싱 실패, 저장 실패)는 로그와 메트릭으로만 남고
//! 이 타입으로 전파되지 않습니다.

use packethunter_core::error::{PacketHunterError, PipelineError, StorageError};

/// 수집 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 이미 종료된 큐에 프레임을 넣으려 함
    #[error("ingestion queue closed")]
    QueueClosed,

    /// 필수 협력자가 주입되지 않음
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for PacketHunterError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::RuleLoad { path, reason } => {
                PacketHunterError::Storage(StorageError::RuleLoad { path, reason })
            }
            IngestError::QueueClosed => PacketHunterError::Pipeline(PipelineError::Shutdown),
            IngestError::Io(e) => PacketHunterError::Io(e),
            other => PacketHunterError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
