//! 디코딩/탐지 벤치마크
//!
//! 프레임 디코딩, 탐지 엔진 평가, 링 버퍼 삽입의 처리량을 측정합니다.

use std::net::IpAddr;
use std::time::SystemTime;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use etherparse::PacketBuilder;
use tokio::time::Instant;

use packethunter_core::pipeline::FrameDecoder;
use packethunter_core::types::{
    CustomRule, DecodedFrame, Direction, ParsedPacket, ProtocolDetails, Severity,
};
use packethunter_pipeline::{DetectionEngine, DetectionSettings, EtherparseDecoder, RingBuffer};

fn udp_frame(dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ipv4([10, 0, 0, 5], [8, 8, 8, 8], 64).udp(40000, dst_port);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}

fn tcp_frame(dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ipv4([10, 0, 0, 5], [93, 184, 216, 34], 64)
        .tcp(40000, dst_port, 1, 65535)
        .psh()
        .ack(1);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}

fn dns_payload() -> Vec<u8> {
    let mut p = vec![0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
    for label in ["www", "example", "com"] {
        p.push(label.len() as u8);
        p.extend_from_slice(label.as_bytes());
    }
    p.extend_from_slice(&[0, 0, 1, 0, 1]);
    p
}

fn packet(id: u64, dst: IpAddr, length: usize, details: ProtocolDetails) -> ParsedPacket {
    ParsedPacket::from_decoded(
        id,
        DecodedFrame {
            protocol: "HTTPS".to_owned(),
            src_ip: "10.0.0.5".parse().unwrap(),
            dst_ip: dst,
            src_port: 40000,
            dst_port: 443,
            length,
            flags: "ACK".to_owned(),
            details,
        },
        Direction::Outbound,
        SystemTime::now(),
    )
}

fn size_rule(i: usize) -> CustomRule {
    CustomRule {
        id: format!("rule-{i}"),
        name: format!("Packet larger than {}", 1000 + i),
        enabled: true,
        metric: "packet_size".to_owned(),
        comparison: "greater_than".to_owned(),
        threshold: 1000 + i as u64,
        window_secs: 0,
        action: "alert".to_owned(),
        severity: Severity::Low,
    }
}

fn bench_decode(c: &mut Criterion) {
    let decoder = EtherparseDecoder::new();
    let dns = udp_frame(53, &dns_payload());
    let http = tcp_frame(80, b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
    let bulk = tcp_frame(9000, &[0xAB; 1400]);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("dns_query", |b| {
        b.iter(|| decoder.decode(black_box(&dns)).unwrap())
    });
    group.bench_function("http_request", |b| {
        b.iter(|| decoder.decode(black_box(&http)).unwrap())
    });
    group.bench_function("tcp_bulk_1400", |b| {
        b.iter(|| decoder.decode(black_box(&bulk)).unwrap())
    });

    group.finish();
}

fn bench_builtin_detectors(c: &mut Criterion) {
    let now = Instant::now();
    let dests: Vec<IpAddr> = (0..64u8)
        .map(|i| IpAddr::from([203, 0, 113, i]))
        .collect();

    let mut group = c.benchmark_group("detection_builtin");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("exfil_1000_packets_64_dests", |b| {
        let mut engine = DetectionEngine::new(&DetectionSettings::default(), Vec::new());
        let packets: Vec<_> = (0..1000u64)
            .map(|i| packet(i, dests[i as usize % dests.len()], 1200, ProtocolDetails::default()))
            .collect();
        b.iter(|| {
            for p in &packets {
                black_box(engine.evaluate(p, now));
            }
        })
    });

    group.bench_function("mitm_1000_packets_stable_pins", |b| {
        let mut engine = DetectionEngine::new(&DetectionSettings::default(), Vec::new());
        let packets: Vec<_> = (0..1000u64)
            .map(|i| {
                let details = ProtocolDetails {
                    tls_sni: Some(format!("host{}.example", i % 32)),
                    tls_cert_fingerprint: Some(format!("fp-{}", i % 32)),
                    ..Default::default()
                };
                packet(i, dests[0], 300, details)
            })
            .collect();
        b.iter(|| {
            for p in &packets {
                black_box(engine.evaluate(p, now));
            }
        })
    });

    group.finish();
}

fn bench_custom_rule_scaling(c: &mut Criterion) {
    let now = Instant::now();
    let settings = DetectionSettings {
        mitm_enabled: false,
        exfil_enabled: false,
        ..Default::default()
    };
    let sample = packet(1, "198.51.100.7".parse().unwrap(), 900, ProtocolDetails::default());

    let mut group = c.benchmark_group("detection_custom_rules");
    group.throughput(Throughput::Elements(1));

    for count in [1usize, 10, 100] {
        let rules = (0..count).map(size_rule).collect();
        let mut engine = DetectionEngine::new(&settings, rules);
        group.bench_with_input(BenchmarkId::from_parameter(count), &sample, |b, p| {
            b.iter(|| black_box(engine.evaluate(black_box(p), now)))
        });
    }

    group.finish();
}

fn bench_ring_buffer(c: &mut Criterion) {
    let sample = packet(1, "198.51.100.7".parse().unwrap(), 900, ProtocolDetails::default());

    let mut group = c.benchmark_group("ring_buffer");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("push_1000_at_capacity", |b| {
        let mut ring = RingBuffer::new(1000);
        for _ in 0..1000 {
            ring.push(sample.clone());
        }
        b.iter(|| {
            for _ in 0..1000 {
                black_box(ring.push(sample.clone()));
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_builtin_detectors,
    bench_custom_rule_scaling,
    bench_ring_buffer,
);
criterion_main!(benches);
