//! 파서 어댑터 -- 외부 디코더 호출 경계
//!
//! [`ParserAdapter`]는 [`FrameDecoder`]의 출력에 패킷 ID, 캡처 시각, 방향을 붙여
//! [`ParsedPacket`]을 만듭니다. 디코딩에 실패하거나 프로토콜 라벨이 비어 있는
//! 프레임은 조용히 버리고 실패 카운터만 올립니다.

use std::sync::Arc;
use std::time::SystemTime;

use packethunter_core::metrics as m;
use packethunter_core::pipeline::FrameDecoder;
use packethunter_core::types::{Direction, ParsedPacket};

/// 디코더 래퍼
pub struct ParserAdapter {
    decoder: Arc<dyn FrameDecoder>,
    next_id: u64,
    parse_failures: u64,
}

impl ParserAdapter {
    pub fn new(decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            decoder,
            next_id: 1,
            parse_failures: 0,
        }
    }

    /// 원시 프레임을 파싱합니다.
    ///
    /// TUN 인터페이스에서 읽은 프레임은 모두 장치가 내보낸 트래픽이므로
    /// 방향은 항상 [`Direction::Outbound`]입니다.
    pub fn parse(&mut self, frame: &[u8]) -> Option<ParsedPacket> {
        let decoded = match self.decoder.decode(frame) {
            Some(d) if !d.protocol.is_empty() => d,
            _ => {
                self.parse_failures += 1;
                metrics::counter!(m::INGEST_PARSE_FAILURES_TOTAL).increment(1);
                tracing::trace!(
                    decoder = self.decoder.name(),
                    len = frame.len(),
                    "frame dropped by decoder"
                );
                return None;
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        Some(ParsedPacket::from_decoded(
            id,
            decoded,
            Direction::Outbound,
            SystemTime::now(),
        ))
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures
    }

    /// 지금까지 생성한 패킷 수
    pub fn parsed_count(&self) -> u64 {
        self.next_id - 1
    }

    pub fn decoder_name(&self) -> &str {
        self.decoder.name()
    }
}
