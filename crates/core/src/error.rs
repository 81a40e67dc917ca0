//! 에러 타입 -- 도메인별 에러 정의
//!
//! 분석 경로의 에러는 포워딩 경로로 전파되지 않습니다. 각 에러가 어디까지
//! 치명적인지는 variant 문서에 적어 둡니다.

/// PacketHunter 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum PacketHunterError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 캡처/포워딩 에러
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// 수집 파이프라인 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 프로세스 귀속 에러
    #[error("attribution error: {0}")]
    Attribution(#[from] AttributionError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 캡처/포워딩 에러
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// 인터페이스 핸들이 유효하지 않거나 검증 실패 (세션 시작에 치명적)
    #[error("interface unavailable: {0}")]
    InterfaceUnavailable(String),

    /// 세션 중 읽기/쓰기 I/O 실패 (포워드 루프에만 치명적)
    #[error("forward io error: {0}")]
    ForwardIo(#[from] std::io::Error),

    /// 이미 실행 중인 세션
    #[error("capture session already running")]
    AlreadyRunning,

    /// 실행 중이 아닌 세션
    #[error("capture session not running")]
    NotRunning,
}

/// 수집 파이프라인 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 종료된 파이프라인에 프레임을 넣으려 함
    #[error("pipeline has been shut down")]
    Shutdown,

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,

    /// 프레임 파싱 실패 (프레임 단위, 조용히 버려짐)
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

/// 스토리지 에러
///
/// 모두 치명적이지 않습니다. 쓰기 실패한 패킷도 링 버퍼와 카운터에는 남습니다.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 쓰기 실패
    #[error("storage write failed: {0}")]
    WriteFailed(String),

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),

    /// 규칙 로드 실패
    #[error("failed to load rules from '{path}': {reason}")]
    RuleLoad { path: String, reason: String },
}

/// 프로세스 귀속 에러
///
/// 치명적이지 않습니다. 패킷은 귀속 없이 집계됩니다.
#[derive(Debug, thiserror::Error)]
pub enum AttributionError {
    /// 귀속 소스를 읽을 수 없음
    #[error("attribution unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_converts_into_top_level() {
        let err: PacketHunterError = CaptureError::InterfaceUnavailable("fd -1".to_owned()).into();
        assert!(matches!(
            err,
            PacketHunterError::Capture(CaptureError::InterfaceUnavailable(_))
        ));
        assert!(err.to_string().contains("interface unavailable"));
    }

    #[test]
    fn io_error_converts_into_forward_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = CaptureError::from(io);
        assert!(matches!(err, CaptureError::ForwardIo(_)));
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn config_error_message_names_field() {
        let err = ConfigError::InvalidValue {
            field: "capture.buffer_size".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        assert!(err.to_string().contains("capture.buffer_size"));
    }

    #[test]
    fn storage_error_display() {
        let err = StorageError::RuleLoad {
            path: "/etc/packethunter/rules.yml".to_owned(),
            reason: "no such file".to_owned(),
        };
        assert!(err.to_string().contains("rules.yml"));
    }
}
