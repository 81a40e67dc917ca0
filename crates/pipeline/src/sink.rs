//! 실시간 구독자 전송
//!
//! [`BroadcastSink`]는 `tokio::sync::broadcast` 채널로 통계 스냅샷과 알림을
//! 구독자에게 뿌립니다. 구독자가 없거나 느리면 이벤트는 버려집니다.

use packethunter_core::pipeline::LiveSink;
use packethunter_core::types::{Alert, CaptureStats, ParsedPacket};
use serde::Serialize;
use tokio::sync::broadcast;

/// 스냅샷 이벤트에 포함할 최근 패킷 최대 수
const MAX_RECENT_IN_EVENT: usize = 50;

/// 실시간 이벤트
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// 통계 스냅샷과 최근 패킷 (최신이 마지막)
    Snapshot {
        stats: CaptureStats,
        recent: Vec<ParsedPacket>,
    },
    /// 새 알림
    Alert(Alert),
}

/// broadcast 채널 기반 [`LiveSink`]
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LiveEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn send(&self, event: LiveEvent) {
        // 구독자가 없으면 Err, 무시
        if self.tx.send(event).is_err() {
            tracing::trace!("no live subscribers");
        }
    }
}

impl LiveSink for BroadcastSink {
    fn publish_snapshot(&self, stats: &CaptureStats, recent: &[ParsedPacket]) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        let skip = recent.len().saturating_sub(MAX_RECENT_IN_EVENT);
        self.send(LiveEvent::Snapshot {
            stats: stats.clone(),
            recent: recent[skip..].to_vec(),
        });
    }

    fn publish_alert(&self, alert: &Alert) {
        self.send(LiveEvent::Alert(alert.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::new_alert;
    use packethunter_core::types::{AlertKind, Severity};
    use std::time::SystemTime;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let sink = BroadcastSink::new(4);
        sink.publish_alert(&new_alert(AlertKind::Mitm, Severity::High, "t", "d", None));
        sink.publish_snapshot(&CaptureStats::empty(SystemTime::now()), &[]);
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[test]
    fn snapshot_reaches_subscriber() {
        let sink = BroadcastSink::new(4);
        let mut rx = sink.subscribe();
        let mut stats = CaptureStats::empty(SystemTime::now());
        stats.total_packets = 3;
        sink.publish_snapshot(&stats, &[]);

        match rx.try_recv().unwrap() {
            LiveEvent::Snapshot { stats, recent } => {
                assert_eq!(stats.total_packets, 3);
                assert!(recent.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn alert_event_serializes_with_type_tag() {
        let event = LiveEvent::Alert(new_alert(
            AlertKind::DataExfiltration,
            Severity::Medium,
            "Large Data Transfer",
            "d",
            Some(1),
        ));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["kind"], "data_exfiltration");
    }
}
