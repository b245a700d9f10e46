//! Codec benchmarks for parley-protocol.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, Frame, Message};

fn chat_frame(len: usize) -> Frame {
    Frame::message(Message::new("alice", "bob", "x".repeat(len)))
}

fn bench_encode_small(c: &mut Criterion) {
    let frame = chat_frame(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let encoded = codec::encode(&chat_frame(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_streaming_decode(c: &mut Criterion) {
    let mut stream = BytesMut::new();
    for _ in 0..100 {
        codec::encode_into(&chat_frame(256), &mut stream).unwrap();
    }
    let stream = stream.freeze();

    c.bench_function("stream_100x256B", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&stream[..]);
            while let Some(frame) = codec::decode_from(&mut buf).unwrap() {
                black_box(frame);
            }
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_streaming_decode
);
criterion_main!(benches);
