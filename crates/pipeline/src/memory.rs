//! 인메모리 저장소
//!
//! [`MemoryStore`]는 패킷, 알림, 규칙 저장소 trait을 모두 구현합니다.
//! 데몬의 기본 저장소이자 테스트용 협력자로 쓰이며, 쓰기 실패와 지연을
//! 주입할 수 있습니다.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use packethunter_core::error::StorageError;
use packethunter_core::pipeline::{AlertStore, BoxFuture, PacketStore, RuleStore};
use packethunter_core::types::{Alert, CustomRule, IpTalker, ParsedPacket};

/// 보관할 최대 패킷 수 (초과 시 오래된 것부터 버림, 집계는 유지)
const DEFAULT_PACKET_RETENTION: usize = 100_000;

#[derive(Default)]
struct Inner {
    packets: Vec<ParsedPacket>,
    alerts: Vec<Alert>,
    rules: Vec<CustomRule>,
    protocols: BTreeMap<String, u64>,
    talkers: HashMap<IpAddr, (u64, u64)>,
}

/// 인메모리 패킷/알림/규칙 저장소
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    retention: usize,
    fail_writes: AtomicBool,
    fail_queries: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_PACKET_RETENTION)
    }

    /// 보관 패킷 수를 지정해 생성합니다.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            retention: retention.max(1),
            fail_writes: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            write_delay_ms: AtomicU64::new(0),
        }
    }

    /// 규칙 목록을 교체합니다.
    pub fn set_rules(&self, rules: Vec<CustomRule>) {
        self.lock().rules = rules;
    }

    /// 쓰기 실패를 주입합니다.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// 조회 실패를 주입합니다.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::Relaxed);
    }

    /// 패킷 쓰기마다 지연을 주입합니다.
    pub fn set_write_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(ms, Ordering::Relaxed);
    }

    pub fn packets(&self) -> Vec<ParsedPacket> {
        self.lock().packets.clone()
    }

    pub fn packet_count(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::WriteFailed("injected write failure".to_owned()));
        }
        Ok(())
    }

    fn check_query(&self) -> Result<(), StorageError> {
        if self.fail_queries.load(Ordering::Relaxed) {
            return Err(StorageError::Query("injected query failure".to_owned()));
        }
        Ok(())
    }
}

impl PacketStore for MemoryStore {
    fn insert_packet(&self, packet: ParsedPacket) -> BoxFuture<'_, Result<u64, StorageError>> {
        Box::pin(async move {
            let delay = self.write_delay_ms.load(Ordering::Relaxed);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            self.check_write()?;

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let mut inner = self.lock();
            *inner.protocols.entry(packet.protocol.clone()).or_insert(0) += 1;
            let talker = inner.talkers.entry(packet.dst_ip).or_insert((0, 0));
            talker.0 += 1;
            talker.1 += packet.length as u64;

            if inner.packets.len() >= self.retention {
                inner.packets.remove(0);
            }
            inner.packets.push(packet);
            Ok(id)
        })
    }

    fn protocol_distribution(&self) -> BoxFuture<'_, Result<BTreeMap<String, u64>, StorageError>> {
        Box::pin(async move {
            self.check_query()?;
            Ok(self.lock().protocols.clone())
        })
    }

    fn top_talkers(&self, limit: usize) -> BoxFuture<'_, Result<Vec<IpTalker>, StorageError>> {
        Box::pin(async move {
            self.check_query()?;
            let inner = self.lock();
            let mut talkers: Vec<IpTalker> = inner
                .talkers
                .iter()
                .map(|(ip, (packet_count, bytes))| IpTalker {
                    ip: *ip,
                    packet_count: *packet_count,
                    bytes: *bytes,
                })
                .collect();
            talkers.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.ip.cmp(&b.ip)));
            talkers.truncate(limit);
            Ok(talkers)
        })
    }
}

impl AlertStore for MemoryStore {
    fn insert_alert(&self, alert: Alert) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            self.check_write()?;
            self.lock().alerts.push(alert);
            Ok(())
        })
    }
}

impl RuleStore for MemoryStore {
    fn enabled_rules(&self) -> BoxFuture<'_, Result<Vec<CustomRule>, StorageError>> {
        Box::pin(async move {
            self.check_query()?;
            Ok(self
                .lock()
                .rules
                .iter()
                .filter(|r| r.enabled)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packethunter_core::types::{DecodedFrame, Direction, ProtocolDetails, Severity};
    use std::time::SystemTime;

    fn packet(protocol: &str, dst: &str, length: usize) -> ParsedPacket {
        ParsedPacket::from_decoded(
            0,
            DecodedFrame {
                protocol: protocol.to_owned(),
                src_ip: "10.0.0.2".parse().unwrap(),
                dst_ip: dst.parse().unwrap(),
                src_port: 5000,
                dst_port: 53,
                length,
                flags: String::new(),
                details: ProtocolDetails::default(),
            },
            Direction::Outbound,
            SystemTime::now(),
        )
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.insert_packet(packet("DNS", "8.8.8.8", 70)).await.unwrap();
        let b = store.insert_packet(packet("DNS", "8.8.8.8", 70)).await.unwrap();
        assert!(b > a);
        assert_eq!(store.packet_count(), 2);
    }

    #[tokio::test]
    async fn aggregates_protocols_and_talkers() {
        let store = MemoryStore::new();
        store.insert_packet(packet("DNS", "8.8.8.8", 70)).await.unwrap();
        store.insert_packet(packet("HTTPS", "1.1.1.1", 1500)).await.unwrap();
        store.insert_packet(packet("DNS", "8.8.8.8", 80)).await.unwrap();

        let dist = store.protocol_distribution().await.unwrap();
        assert_eq!(dist.get("DNS"), Some(&2));
        assert_eq!(dist.get("HTTPS"), Some(&1));

        let top = store.top_talkers(1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].ip, "1.1.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(top[0].bytes, 1500);
    }

    #[tokio::test]
    async fn retention_drops_oldest_packets() {
        let store = MemoryStore::with_retention(2);
        for len in [1, 2, 3] {
            store.insert_packet(packet("UDP", "9.9.9.9", len)).await.unwrap();
        }
        let lengths: Vec<_> = store.packets().iter().map(|p| p.length).collect();
        assert_eq!(lengths, vec![2, 3]);
        assert_eq!(store.top_talkers(5).await.unwrap()[0].packet_count, 3);
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.insert_packet(packet("DNS", "8.8.8.8", 70)).await.is_err());
        store.set_fail_queries(true);
        assert!(store.protocol_distribution().await.is_err());
        assert!(store.enabled_rules().await.is_err());
    }

    #[tokio::test]
    async fn enabled_rules_filters_disabled() {
        let store = MemoryStore::new();
        let rule = |id: &str, enabled| CustomRule {
            id: id.to_owned(),
            name: id.to_owned(),
            enabled,
            metric: "packet_size".to_owned(),
            comparison: "greater_than".to_owned(),
            threshold: 1000,
            window_secs: 0,
            action: "alert".to_owned(),
            severity: Severity::Low,
        };
        store.set_rules(vec![rule("on", true), rule("off", false)]);
        let rules = store.enabled_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "on");
    }
}
