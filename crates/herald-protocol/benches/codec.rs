//! Codec benchmarks for herald-protocol.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use herald_protocol::{codec, Frame};

fn notification_payload() -> Vec<u8> {
    br#"{"id":"n1","subscriptionId":"s1","title":"Invoice ready","content":"Your invoice for October is available.","category":"system","targetRoles":null,"createdAt":"2024-10-01T10:00:00Z","isRead":false,"readAt":null}"#.to_vec()
}

fn bench_encode_push(c: &mut Criterion) {
    let payload = notification_payload();
    let frame = Frame::publish("notifications/subject-1", payload.clone());

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("notification_push", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    let frames: Vec<Frame> = (0..32)
        .map(|i| Frame::publish("notifications/subject-1/count", i.to_string().into_bytes()))
        .collect();
    let mut wire = BytesMut::new();
    for frame in &frames {
        wire.extend_from_slice(&codec::encode(frame).unwrap());
    }

    let mut group = c.benchmark_group("decode_from");
    group.throughput(Throughput::Bytes(wire.len() as u64));
    group.bench_function("count_burst_32", |b| {
        b.iter(|| {
            let mut buf = wire.clone();
            while let Some(frame) = codec::decode_from(&mut buf).unwrap() {
                black_box(frame);
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_encode_push, bench_stream_decode);
criterion_main!(benches);
