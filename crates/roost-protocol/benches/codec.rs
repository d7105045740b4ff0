//! Codec benchmarks for roost-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use roost_protocol::{codec, ClientFrame, ServerFrame, WireMessage};

fn bench_encode_message(c: &mut Criterion) {
    let frame = ClientFrame::SendMessage {
        to: 42,
        content: "x".repeat(64),
    };

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("send_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_message(c: &mut Criterion) {
    let frame = ClientFrame::SendMessage {
        to: 42,
        content: "x".repeat(64),
    };
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("send_64B", |b| {
        b.iter(|| codec::decode::<ClientFrame>(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip_receive(c: &mut Criterion) {
    let frame = ServerFrame::receive(WireMessage {
        id: 1,
        from: 7,
        to: 42,
        content: "x".repeat(256),
        created_at: 1_700_000_000_000,
        auto_response: false,
    });

    c.bench_function("roundtrip_receive_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode::<ServerFrame>(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_message,
    bench_decode_message,
    bench_roundtrip_receive
);
criterion_main!(benches);
