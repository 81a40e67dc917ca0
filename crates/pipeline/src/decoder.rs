//! 기본 프레임 디코더
//!
//! [`EtherparseDecoder`]는 TUN 인터페이스에서 읽은 IP 프레임(링크 계층 헤더 없음)을
//! `etherparse`로 잘라 [`DecodedFrame`]으로 변환합니다. 애플리케이션 계층 필드
//! (HTTP 메서드/URL, DNS 질의 이름, TLS SNI)는 페이로드에서 best-effort로 추출합니다.
//!
//! 프로토콜 라벨은 잘 알려진 포트 기준입니다.
//!
//! | 전송 계층 | 포트 | 라벨 |
//! |-----------|------|------|
//! | UDP/TCP | 53 | `DNS` |
//! | TCP | 80, 8080 | `HTTP` |
//! | TCP | 443, 8443 | `HTTPS` |
//! | TCP/UDP | 기타 | `TCP` / `UDP` |
//! | ICMP | - | `ICMP` / `ICMPv6` |

use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use packethunter_core::pipeline::FrameDecoder;
use packethunter_core::types::{DecodedFrame, ProtocolDetails};

/// HTTP 요청 라인 검사 시 읽는 최대 바이트
const HTTP_SNIFF_LIMIT: usize = 500;

/// DNS 질의 이름 최대 길이
const DNS_NAME_LIMIT: usize = 253;

const HTTP_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT",
];

/// etherparse 기반 IP 프레임 디코더
#[derive(Debug, Clone, Copy, Default)]
pub struct EtherparseDecoder;

impl EtherparseDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameDecoder for EtherparseDecoder {
    fn name(&self) -> &str {
        "etherparse"
    }

    fn decode(&self, frame: &[u8]) -> Option<DecodedFrame> {
        let sliced = SlicedPacket::from_ip(frame).ok()?;

        let (src_ip, dst_ip) = match &sliced.net {
            Some(NetSlice::Ipv4(ipv4)) => {
                let h = ipv4.header();
                (IpAddr::V4(h.source_addr()), IpAddr::V4(h.destination_addr()))
            }
            Some(NetSlice::Ipv6(ipv6)) => {
                let h = ipv6.header();
                (IpAddr::V6(h.source_addr()), IpAddr::V6(h.destination_addr()))
            }
            _ => return None,
        };

        let mut details = ProtocolDetails::default();
        let (protocol, src_port, dst_port, flags) = match &sliced.transport {
            Some(TransportSlice::Tcp(tcp)) => {
                let (sp, dp) = (tcp.source_port(), tcp.destination_port());
                let payload = tcp.payload();
                let label = if is_port(sp, dp, &[53]) {
                    "DNS"
                } else if is_port(sp, dp, &[80, 8080]) {
                    sniff_http(payload, &mut details);
                    "HTTP"
                } else if is_port(sp, dp, &[443, 8443]) {
                    details.tls_sni = parse_tls_sni(payload);
                    "HTTPS"
                } else {
                    "TCP"
                };

                let mut flags = Vec::new();
                if tcp.syn() {
                    flags.push("SYN");
                }
                if tcp.ack() {
                    flags.push("ACK");
                }
                if tcp.fin() {
                    flags.push("FIN");
                }
                if tcp.rst() {
                    flags.push("RST");
                }
                if tcp.psh() {
                    flags.push("PSH");
                }
                if tcp.urg() {
                    flags.push("URG");
                }
                (label, sp, dp, flags.join(","))
            }
            Some(TransportSlice::Udp(udp)) => {
                let (sp, dp) = (udp.source_port(), udp.destination_port());
                let label = if is_port(sp, dp, &[53]) {
                    parse_dns(udp.payload(), &mut details);
                    "DNS"
                } else {
                    "UDP"
                };
                (label, sp, dp, String::new())
            }
            Some(TransportSlice::Icmpv4(_)) => ("ICMP", 0, 0, String::new()),
            Some(TransportSlice::Icmpv6(_)) => ("ICMPv6", 0, 0, String::new()),
            _ => ("OTHER", 0, 0, String::new()),
        };

        Some(DecodedFrame {
            protocol: protocol.to_owned(),
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            length: frame.len(),
            flags,
            details,
        })
    }
}

fn is_port(src: u16, dst: u16, ports: &[u16]) -> bool {
    ports.contains(&src) || ports.contains(&dst)
}

/// 요청 라인에서 메서드와 URL을, 응답이면 `RESPONSE`를 채웁니다.
fn sniff_http(payload: &[u8], details: &mut ProtocolDetails) {
    let head = &payload[..payload.len().min(HTTP_SNIFF_LIMIT)];
    let Ok(text) = std::str::from_utf8(head) else {
        return;
    };
    if text.starts_with("HTTP/") {
        details.http_method = Some("RESPONSE".to_owned());
        return;
    }
    let mut parts = text.splitn(3, ' ');
    let (Some(method), Some(url)) = (parts.next(), parts.next()) else {
        return;
    };
    if HTTP_METHODS.contains(&method) {
        details.http_method = Some(method.to_owned());
        details.http_url = Some(url.to_owned());
    }
}

/// DNS 메시지의 첫 질의 이름을 읽습니다. QR 비트가 켜져 있으면 응답으로 기록합니다.
fn parse_dns(payload: &[u8], details: &mut ProtocolDetails) {
    if payload.len() < 13 {
        return;
    }
    let is_response = payload[2] & 0x80 != 0;
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    if qdcount == 0 {
        return;
    }

    let mut pos = 12;
    let mut name = String::new();
    loop {
        let Some(&label_len) = payload.get(pos) else {
            return;
        };
        let label_len = usize::from(label_len);
        if label_len == 0 {
            break;
        }
        // 질의 이름에는 압축 포인터가 없어야 함
        if label_len > 63 {
            return;
        }
        pos += 1;
        let Some(label) = payload.get(pos..pos + label_len) else {
            return;
        };
        let Ok(label) = std::str::from_utf8(label) else {
            return;
        };
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&label.to_ascii_lowercase());
        if name.len() > DNS_NAME_LIMIT {
            return;
        }
        pos += label_len;
    }

    if name.is_empty() {
        return;
    }
    if is_response {
        details.dns_response = Some(name);
    } else {
        details.dns_query = Some(name);
    }
}

/// TLS ClientHello의 server_name 확장에서 호스트 이름을 읽습니다.
pub(crate) fn parse_tls_sni(payload: &[u8]) -> Option<String> {
    // record(5) + handshake header(4) + client version(2) + random(32)
    const SESSION_ID_OFFSET: usize = 43;

    if payload.len() <= SESSION_ID_OFFSET || payload[0] != 0x16 || payload[5] != 0x01 {
        return None;
    }

    let mut pos = SESSION_ID_OFFSET;
    let session_id_len = usize::from(*payload.get(pos)?);
    pos += 1 + session_id_len;

    let cipher_len = read_u16(payload, pos)?;
    pos += 2 + cipher_len;

    let compression_len = usize::from(*payload.get(pos)?);
    pos += 1 + compression_len;

    let extensions_len = read_u16(payload, pos)?;
    pos += 2;
    let end = (pos + extensions_len).min(payload.len());

    while pos + 4 <= end {
        let ext_type = read_u16(payload, pos)?;
        let ext_len = read_u16(payload, pos + 2)?;
        pos += 4;
        if ext_type == 0x0000 {
            // server_name_list: list len(2) + name type(1) + name len(2) + name
            let name_type = *payload.get(pos + 2)?;
            if name_type != 0 {
                return None;
            }
            let name_len = read_u16(payload, pos + 3)?;
            let name = payload.get(pos + 5..pos + 5 + name_len)?;
            return std::str::from_utf8(name).ok().map(str::to_owned);
        }
        pos += ext_len;
    }
    None
}

fn read_u16(buf: &[u8], pos: usize) -> Option<usize> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
}

#[cfg(test)]
pub(crate) mod test_frames {
    //! 테스트용 IP 프레임 생성기

    use etherparse::PacketBuilder;

    pub fn udp_v4(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ipv4(src, dst, 64).udp(sport, dport);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    pub fn tcp_v4(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ipv4(src, dst, 64)
            .tcp(sport, dport, 1, 65535)
            .syn()
            .ack(1);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    /// `name`에 대한 DNS A 질의
    pub fn dns_query(name: &str) -> Vec<u8> {
        let mut msg = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        for label in name.split('.') {
            msg.push(label.len() as u8);
            msg.extend_from_slice(label.as_bytes());
        }
        msg.extend_from_slice(&[0, 0x00, 0x01, 0x00, 0x01]);
        msg
    }

    /// SNI 확장 하나만 가진 최소 ClientHello
    pub fn client_hello(sni: &str) -> Vec<u8> {
        let name = sni.as_bytes();
        let mut sni_ext = Vec::new();
        sni_ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        sni_ext.push(0);
        sni_ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni_ext.extend_from_slice(name);

        let mut extensions = vec![0x00, 0x00];
        extensions.extend_from_slice(&(sni_ext.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&sni_ext);

        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[0u8; 32]);
        body.push(0); // session id
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // one cipher suite
        body.extend_from_slice(&[0x01, 0x00]); // null compression
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = vec![0x01];
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![0x16, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::test_frames::*;
    use super::*;

    #[test]
    fn decodes_dns_query_over_udp() {
        let frame = udp_v4([10, 0, 0, 5], 9000, [8, 8, 8, 8], 53, &dns_query("Example.com"));
        let decoded = EtherparseDecoder.decode(&frame).unwrap();
        assert_eq!(decoded.protocol, "DNS");
        assert_eq!(decoded.src_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(decoded.dst_port, 53);
        assert_eq!(decoded.length, frame.len());
        assert_eq!(decoded.details.dns_query.as_deref(), Some("example.com"));
        assert!(decoded.flags.is_empty());
    }

    #[test]
    fn dns_response_goes_to_response_field() {
        let mut msg = dns_query("example.com");
        msg[2] |= 0x80;
        let frame = udp_v4([8, 8, 8, 8], 53, [10, 0, 0, 5], 9000, &msg);
        let decoded = EtherparseDecoder.decode(&frame).unwrap();
        assert_eq!(decoded.details.dns_response.as_deref(), Some("example.com"));
        assert!(decoded.details.dns_query.is_none());
    }

    #[test]
    fn extracts_tls_sni() {
        let frame = tcp_v4([10, 0, 0, 2], 40000, [1, 1, 1, 1], 443, &client_hello("example.com"));
        let decoded = EtherparseDecoder.decode(&frame).unwrap();
        assert_eq!(decoded.protocol, "HTTPS");
        assert_eq!(decoded.details.tls_sni.as_deref(), Some("example.com"));
        assert_eq!(decoded.flags, "SYN,ACK");
    }

    #[test]
    fn sniffs_http_request_line() {
        let frame = tcp_v4(
            [10, 0, 0, 2],
            40000,
            [93, 184, 216, 34],
            80,
            b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n",
        );
        let decoded = EtherparseDecoder.decode(&frame).unwrap();
        assert_eq!(decoded.protocol, "HTTP");
        assert_eq!(decoded.details.http_method.as_deref(), Some("GET"));
        assert_eq!(decoded.details.http_url.as_deref(), Some("/index.html"));
    }

    #[test]
    fn unknown_ports_fall_back_to_transport_label() {
        let frame = udp_v4([10, 0, 0, 2], 5000, [10, 0, 0, 9], 6000, b"hello");
        assert_eq!(EtherparseDecoder.decode(&frame).unwrap().protocol, "UDP");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(EtherparseDecoder.decode(&[]).is_none());
        assert!(EtherparseDecoder.decode(&[0xff; 8]).is_none());
    }

    #[test]
    fn truncated_client_hello_yields_none() {
        let hello = client_hello("example.com");
        assert!(parse_tls_sni(&hello[..50]).is_none());
        assert!(parse_tls_sni(b"not tls at all, definitely not a client hello").is_none());
    }

    // Property-based tests using proptest
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_arbitrary_bytes_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..2000)) {
                let _ = EtherparseDecoder.decode(&bytes);
            }

            #[test]
            fn tls_sni_arbitrary_payload_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..600)) {
                let _ = parse_tls_sni(&bytes);
            }
        }
    }
}
