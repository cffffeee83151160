use std::hint::black_box;

use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use zumq::transport::{MultipartDecoder, MultipartEncoder};

fn message(
    frames: usize,
    frame_size: usize,
) -> Vec<Bytes> {
    (0..frames)
        .map(|i| Bytes::from(vec![i as u8; frame_size]))
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("multipart_encode");
    for &(frames, size) in &[(1, 64), (3, 256), (8, 4096)] {
        let msg = message(frames, size);
        group.throughput(Throughput::Bytes(MultipartEncoder::encoded_len(&msg) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{frames}x{size}")),
            &msg,
            |b, msg| {
                let mut buf = BytesMut::with_capacity(MultipartEncoder::encoded_len(msg));
                b.iter(|| {
                    buf.clear();
                    MultipartEncoder::encode(black_box(msg), &mut buf);
                })
            },
        );
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("multipart_decode");
    for &(frames, size) in &[(1, 64), (3, 256), (8, 4096)] {
        let mut wire = BytesMut::new();
        MultipartEncoder::encode(&message(frames, size), &mut wire);
        let wire = wire.freeze();

        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{frames}x{size}")),
            &wire,
            |b, wire| {
                b.iter(|| {
                    let mut src = BytesMut::from(&wire[..]);
                    let mut decoder = MultipartDecoder::default();
                    black_box(decoder.decode(&mut src))
                })
            },
        );
    }
    group.finish();
}

/// Сообщение, пришедшее по байту: худший случай для буферизации.
fn bench_decode_fragmented(c: &mut Criterion) {
    let mut wire = BytesMut::new();
    MultipartEncoder::encode(&message(3, 128), &mut wire);
    let wire = wire.freeze();

    c.bench_function("multipart_decode_byte_by_byte", |b| {
        b.iter(|| {
            let mut decoder = MultipartDecoder::default();
            let mut src = BytesMut::new();
            let mut decoded = None;
            for byte in wire.iter() {
                src.extend_from_slice(&[*byte]);
                if let Ok(Some(msg)) = decoder.decode(&mut src) {
                    decoded = Some(msg);
                }
            }
            black_box(decoded)
        })
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_decode_fragmented
);
criterion_main!(benches);
