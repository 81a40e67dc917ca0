//! 알림 생성 및 전달
//!
//! 탐지기는 [`new_alert`]로 알림을 만들고, 파이프라인 consumer는
//! [`AlertDispatcher`]로 알림을 저장소(fire-and-forget)와 실시간 구독자에 넘깁니다.
//! 저장 대기는 consumer의 처리 경로 밖에서 일어납니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use packethunter_core::metrics as m;
use packethunter_core::pipeline::{AlertStore, LiveSink};
use packethunter_core::types::{Alert, AlertKind, Severity};
use tokio::task::JoinHandle;

/// 새 알림을 생성합니다. ID는 UUID v4, 시각은 현재 시각입니다.
pub fn new_alert(
    kind: AlertKind,
    severity: Severity,
    title: impl Into<String>,
    description: impl Into<String>,
    related_packet_id: Option<u64>,
) -> Alert {
    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: SystemTime::now(),
        severity,
        kind,
        title: title.into(),
        description: description.into(),
        related_packet_id,
        acknowledged: false,
    }
}

/// 알림 전달기
///
/// 저장은 분리된 태스크에서 수행하며 결과를 기다리지 않습니다.
/// 실시간 구독자 전송은 best-effort입니다.
#[derive(Clone)]
pub struct AlertDispatcher {
    store: Arc<dyn AlertStore>,
    sink: Option<Arc<dyn LiveSink>>,
    dispatched: Arc<AtomicU64>,
    store_failures: Arc<AtomicU64>,
}

impl AlertDispatcher {
    pub fn new(store: Arc<dyn AlertStore>, sink: Option<Arc<dyn LiveSink>>) -> Self {
        Self {
            store,
            sink,
            dispatched: Arc::new(AtomicU64::new(0)),
            store_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 알림을 전달합니다. 저장 태스크의 핸들을 반환하지만 호출자는 기다리지 않아도 됩니다.
    pub fn dispatch(&self, alert: Alert) -> JoinHandle<()> {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::DETECTION_ALERTS_TOTAL,
            m::LABEL_KIND => alert.kind.as_str(),
            m::LABEL_SEVERITY => alert.severity.as_label()
        )
        .increment(1);

        tracing::info!(
            alert_id = %alert.id,
            kind = %alert.kind,
            severity = %alert.severity,
            title = %alert.title,
            "alert emitted"
        );

        if let Some(sink) = &self.sink {
            sink.publish_alert(&alert);
        }

        let store = Arc::clone(&self.store);
        let failures = Arc::clone(&self.store_failures);
        tokio::spawn(async move {
            let alert_id = alert.id.clone();
            if let Err(e) = store.insert_alert(alert).await {
                failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::DETECTION_ALERT_STORE_FAILURES_TOTAL).increment(1);
                tracing::warn!(alert_id = %alert_id, error = %e, "failed to persist alert");
            }
        })
    }

    /// 전달된 알림 수
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// 저장 실패 수
    pub fn store_failure_count(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::sink::BroadcastSink;
    use crate::sink::LiveEvent;

    #[test]
    fn new_alert_is_unacknowledged_with_unique_id() {
        let a = new_alert(AlertKind::Mitm, Severity::High, "t", "d", Some(3));
        let b = new_alert(AlertKind::Mitm, Severity::High, "t", "d", Some(3));
        assert!(!a.acknowledged);
        assert_ne!(a.id, b.id);
        assert_eq!(a.related_packet_id, Some(3));
    }

    #[tokio::test]
    async fn dispatch_persists_and_broadcasts() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(BroadcastSink::new(8));
        let mut rx = sink.subscribe();
        let dispatcher = AlertDispatcher::new(store.clone(), Some(sink));

        let alert = new_alert(
            AlertKind::CustomRule,
            Severity::Low,
            "big packet",
            "Packet size: 1500 - alert",
            Some(1),
        );
        dispatcher.dispatch(alert).await.unwrap();

        assert_eq!(dispatcher.dispatched_count(), 1);
        assert_eq!(store.alerts().len(), 1);
        match rx.try_recv().unwrap() {
            LiveEvent::Alert(a) => assert_eq!(a.title, "big packet"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_counts_store_failures() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let dispatcher = AlertDispatcher::new(store.clone(), None);

        dispatcher
            .dispatch(new_alert(AlertKind::Mitm, Severity::High, "t", "d", None))
            .await
            .unwrap();

        assert_eq!(dispatcher.store_failure_count(), 1);
        assert!(store.alerts().is_empty());
    }
}
