//! 트래픽 → 프로세스 귀속
//!
//! - [`NoAttribution`]: 귀속을 하지 않는 기본 구현
//! - [`ProcNetAttribution`]: Linux `/proc/net/{tcp,tcp6,udp,udp6}`의 소켓 테이블로
//!   로컬 포트의 소유 uid를 찾습니다. 테이블은 파이프라인의 주기 타이머가
//!   [`Attribution::refresh`]로 다시 읽습니다.
//!
//! 귀속 실패는 패킷 처리를 막지 않습니다. 파이프라인은 실패를 debug 로그로 남기고
//! 다음 단계로 진행합니다.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use packethunter_core::error::AttributionError;
use packethunter_core::pipeline::{Attribution, BoxFuture};
use packethunter_core::types::{AppTalker, Direction};

/// 읽어들이는 소켓 테이블 파일
const SOCKET_TABLES: &[&str] = &["tcp", "tcp6", "udp", "udp6"];

// =============================================================================
// NoAttribution
// =============================================================================

/// 귀속을 수행하지 않는 구현
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAttribution;

impl Attribution for NoAttribution {
    fn resolve(
        &self,
        _src_ip: IpAddr,
        _src_port: u16,
        _dst_ip: IpAddr,
        _dst_port: u16,
    ) -> Result<Option<String>, AttributionError> {
        Ok(None)
    }

    fn record(&self, _owner: &str, _direction: Direction, _bytes: u64, _remote: IpAddr, _protocol: &str) {}

    fn refresh(&self) -> BoxFuture<'_, Result<(), AttributionError>> {
        Box::pin(async { Ok(()) })
    }

    fn app_talkers(&self, _limit: usize) -> Vec<AppTalker> {
        Vec::new()
    }
}

// =============================================================================
// 소유자별 집계
// =============================================================================

#[derive(Debug, Default)]
struct OwnerTraffic {
    packets_sent: u64,
    packets_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    remote_hosts: HashSet<IpAddr>,
    protocols: BTreeSet<String>,
}

/// 소유자별 트래픽 장부
#[derive(Debug, Default)]
struct TalkerLedger {
    owners: Mutex<HashMap<String, OwnerTraffic>>,
}

impl TalkerLedger {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, OwnerTraffic>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, owner: &str, direction: Direction, bytes: u64, remote: IpAddr, protocol: &str) {
        let mut owners = self.lock();
        let entry = owners.entry(owner.to_owned()).or_default();
        match direction {
            Direction::Outbound => {
                entry.packets_sent += 1;
                entry.bytes_sent += bytes;
            }
            Direction::Inbound => {
                entry.packets_received += 1;
                entry.bytes_received += bytes;
            }
        }
        entry.remote_hosts.insert(remote);
        if !entry.protocols.contains(protocol) {
            entry.protocols.insert(protocol.to_owned());
        }
    }

    fn top(&self, limit: usize) -> Vec<AppTalker> {
        let owners = self.lock();
        let mut talkers: Vec<AppTalker> = owners
            .iter()
            .map(|(owner, t)| AppTalker {
                owner: owner.clone(),
                packets_sent: t.packets_sent,
                packets_received: t.packets_received,
                bytes_sent: t.bytes_sent,
                bytes_received: t.bytes_received,
                remote_hosts: t.remote_hosts.len(),
                protocols: t.protocols.iter().cloned().collect(),
            })
            .collect();
        talkers.sort_by(|a, b| {
            b.total_bytes()
                .cmp(&a.total_bytes())
                .then_with(|| a.owner.cmp(&b.owner))
        });
        talkers.truncate(limit);
        talkers
    }
}

// =============================================================================
// ProcNetAttribution
// =============================================================================

/// `/proc/net` 소켓 테이블 기반 귀속
pub struct ProcNetAttribution {
    root: PathBuf,
    /// 로컬 포트 → uid. `None`이면 아직 한 번도 읽지 못함
    ports: RwLock<Option<HashMap<u16, u32>>>,
    ledger: TalkerLedger,
}

impl Default for ProcNetAttribution {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcNetAttribution {
    pub fn new() -> Self {
        Self::with_root("/proc/net")
    }

    /// 소켓 테이블 디렉토리를 지정해 생성합니다.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ports: RwLock::new(None),
            ledger: TalkerLedger::default(),
        }
    }

    /// 현재 테이블의 포트 수
    pub fn known_ports(&self) -> usize {
        self.ports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, HashMap::len)
    }
}

impl Attribution for ProcNetAttribution {
    fn resolve(
        &self,
        _src_ip: IpAddr,
        src_port: u16,
        _dst_ip: IpAddr,
        dst_port: u16,
    ) -> Result<Option<String>, AttributionError> {
        let guard = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        let ports = guard.as_ref().ok_or_else(|| {
            AttributionError::Unavailable("socket table not loaded".to_owned())
        })?;

        // outbound면 src_port가 로컬, inbound면 dst_port가 로컬
        let uid = ports.get(&src_port).or_else(|| ports.get(&dst_port));
        Ok(uid.map(|uid| format!("uid:{uid}")))
    }

    fn record(&self, owner: &str, direction: Direction, bytes: u64, remote: IpAddr, protocol: &str) {
        self.ledger.record(owner, direction, bytes, remote, protocol);
    }

    fn refresh(&self) -> BoxFuture<'_, Result<(), AttributionError>> {
        Box::pin(async move {
            let mut table = HashMap::new();
            let mut loaded = 0usize;

            for name in SOCKET_TABLES {
                let path = self.root.join(name);
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => {
                        parse_socket_table(&content, &mut table);
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::trace!(path = %path.display(), error = %e, "socket table unreadable");
                    }
                }
            }

            if loaded == 0 {
                return Err(AttributionError::Unavailable(format!(
                    "no socket tables readable under {}",
                    self.root.display()
                )));
            }

            let count = table.len();
            *self.ports.write().unwrap_or_else(PoisonError::into_inner) = Some(table);
            tracing::trace!(ports = count, "socket table refreshed");
            Ok(())
        })
    }

    fn app_talkers(&self, limit: usize) -> Vec<AppTalker> {
        self.ledger.top(limit)
    }
}

/// `/proc/net/{tcp,udp}[6]` 형식 텍스트에서 로컬 포트 → uid를 채웁니다.
///
/// 헤더 줄과 형식이 맞지 않는 줄은 건너뜁니다.
pub fn parse_socket_table(content: &str, table: &mut HashMap<u16, u32>) {
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // sl local rem st tx:rx tr:when retrnsmt uid ...
        if fields.len() < 8 {
            continue;
        }
        let Some(port) = fields[1]
            .rsplit_once(':')
            .and_then(|(_, port)| u16::from_str_radix(port, 16).ok())
        else {
            continue;
        };
        let Ok(uid) = fields[7].parse::<u32>() else {
            continue;
        };
        if port != 0 {
            table.entry(port).or_insert(uid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0035 00000000:0000 0A 00000000:00000000 00:00000000 00000000   101        0 12345 1 0000000000000000 100 0 0 10 0
   1: 0200000A:9C40 08080808:01BB 01 00000000:00000000 00:00000000 00000000 10123        0 23456 1 0000000000000000 20 4 30 10 -1
";

    const TCP6_TABLE: &str = "\
  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000001000000:1F90 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 34567 1 0000000000000000 100 0 0 10 0
";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parses_ipv4_and_ipv6_tables() {
        let mut table = HashMap::new();
        parse_socket_table(TCP_TABLE, &mut table);
        parse_socket_table(TCP6_TABLE, &mut table);
        assert_eq!(table.get(&53), Some(&101));
        assert_eq!(table.get(&40000), Some(&10123));
        assert_eq!(table.get(&8080), Some(&1000));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let mut table = HashMap::new();
        parse_socket_table("header\ngarbage line\n 0: nothex:ZZZZ x y z w v 5\n", &mut table);
        assert!(table.is_empty());
    }

    #[test]
    fn resolve_before_refresh_is_unavailable() {
        let attribution = ProcNetAttribution::with_root("/nonexistent");
        let result = attribution.resolve(ip("10.0.0.2"), 40000, ip("8.8.8.8"), 443);
        assert!(matches!(result, Err(AttributionError::Unavailable(_))));
    }

    #[tokio::test]
    async fn refresh_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("tcp"), TCP_TABLE).await.unwrap();

        let attribution = ProcNetAttribution::with_root(dir.path());
        attribution.refresh().await.unwrap();
        assert_eq!(attribution.known_ports(), 2);

        let owner = attribution
            .resolve(ip("10.0.0.2"), 40000, ip("8.8.8.8"), 443)
            .unwrap();
        assert_eq!(owner.as_deref(), Some("uid:10123"));

        let unknown = attribution
            .resolve(ip("10.0.0.2"), 1234, ip("8.8.8.8"), 4321)
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn refresh_without_tables_fails() {
        let dir = tempfile::tempdir().unwrap();
        let attribution = ProcNetAttribution::with_root(dir.path());
        assert!(attribution.refresh().await.is_err());
    }

    #[test]
    fn app_talkers_ranked_by_bytes() {
        let attribution = ProcNetAttribution::with_root("/nonexistent");
        attribution.record("uid:1", Direction::Outbound, 100, ip("1.1.1.1"), "DNS");
        attribution.record("uid:2", Direction::Outbound, 5000, ip("2.2.2.2"), "HTTPS");
        attribution.record("uid:2", Direction::Inbound, 700, ip("3.3.3.3"), "HTTPS");
        attribution.record("uid:2", Direction::Outbound, 10, ip("2.2.2.2"), "DNS");

        let talkers = attribution.app_talkers(10);
        assert_eq!(talkers.len(), 2);
        assert_eq!(talkers[0].owner, "uid:2");
        assert_eq!(talkers[0].packets_sent, 2);
        assert_eq!(talkers[0].bytes_received, 700);
        assert_eq!(talkers[0].remote_hosts, 2);
        assert_eq!(talkers[0].protocols, vec!["DNS".to_owned(), "HTTPS".to_owned()]);

        assert_eq!(attribution.app_talkers(1).len(), 1);
    }

    #[tokio::test]
    async fn no_attribution_is_inert() {
        let attribution = NoAttribution;
        attribution.refresh().await.unwrap();
        assert!(attribution.resolve(ip("1.1.1.1"), 1, ip("2.2.2.2"), 2).unwrap().is_none());
        attribution.record("x", Direction::Outbound, 1, ip("1.1.1.1"), "TCP");
        assert!(attribution.app_talkers(5).is_empty());
    }
}
