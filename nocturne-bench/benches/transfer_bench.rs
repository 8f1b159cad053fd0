//! Chunk encoder and reassembler benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nocturne_transfer::{AssetClass, ChecksumAlgorithm, ChunkEncoder, Reassembler};

/// Artwork-like data: mostly noise with some repetition.
fn create_test_asset(size: usize) -> Vec<u8> {
    let mut x: u32 = 0x1234_5678;
    (0..size)
        .map(|i| {
            if i % 7 == 0 {
                return 0;
            }
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    let asset = create_test_asset(50_000);
    group.throughput(Throughput::Bytes(asset.len() as u64));

    for mtu in [23u16, 185, 517] {
        let encoder = ChunkEncoder::default();
        group.bench_with_input(BenchmarkId::new("sha256_zlib6", mtu), &mtu, |b, &mtu| {
            b.iter(|| black_box(encoder.plan(&asset, mtu, "bench", AssetClass::AlbumArt).unwrap()));
        });
    }

    let raw = ChunkEncoder::new(ChecksumAlgorithm::Blake3, None);
    group.bench_function("blake3_raw/517", |b| {
        b.iter(|| black_box(raw.plan(&asset, 517, "bench", AssetClass::AlbumArt).unwrap()));
    });

    group.finish();
}

fn bench_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassemble");

    for size in [10_000, 50_000, 200_000] {
        let asset = create_test_asset(size);
        let plan = ChunkEncoder::default()
            .plan(&asset, 185, "bench", AssetClass::Weather)
            .unwrap();
        let mut frames = vec![plan.start_frame().unwrap()];
        frames.extend(plan.chunk_frames());
        frames.push(plan.end_frame(true));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frames, |b, frames| {
            b.iter(|| {
                let mut reassembler = Reassembler::new(AssetClass::Weather);
                let mut done = None;
                for frame in frames {
                    done = reassembler.on_frame(frame).unwrap();
                }
                black_box(done.unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan, bench_reassemble);
criterion_main!(benches);
