/// Benchmarks for the inbound hot path: decoding a text frame into an envelope and
/// routing it to a sink.
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use review_channel::ws::router::{Inbound, dispatch};
use review_channel::ws::{Envelope, NoopSink};

const DETECTION: &str = r#"{
    "type": "new_detection",
    "data": {
        "detection_id": "16fd2706-8baf-433b-82eb-8c7fada847da",
        "is_anomaly": true,
        "confidence": 0.92,
        "timestamp": "2024-05-01T10:01:00.000000"
    },
    "timestamp": "2024-05-01T10:01:00.000000"
}"#;

const NOTIFICATION: &str = r#"{
    "type": "notification",
    "data": {"message": "Upload processed", "severity": "success", "data": {"file": "batch-7.csv"}},
    "timestamp": "2024-05-01T10:01:00.000000"
}"#;

const HEARTBEAT_ACK: &str = r#"{"type": "heartbeat_ack", "data": {"timestamp": "2024-05-01T10:01:00.000000"}}"#;

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel/decode");

    for (name, frame) in [
        ("new_detection", DETECTION),
        ("notification", NOTIFICATION),
        ("heartbeat_ack", HEARTBEAT_ACK),
    ] {
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let _: Envelope = Envelope::decode(std::hint::black_box(frame))
                    .expect("Decoding should succeed");
            });
        });
    }

    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel/route");

    for (name, frame) in [("new_detection", DETECTION), ("notification", NOTIFICATION)] {
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let envelope =
                    Envelope::decode(std::hint::black_box(frame)).expect("Decoding should succeed");
                dispatch(Inbound::from(envelope), &NoopSink);
            });
        });
    }

    group.finish();
}

criterion_group!(channel_benches, bench_decode, bench_route);
criterion_main!(channel_benches);
