// Arena allocator benchmarks for kiln-mem
//
// These benchmarks measure bump allocation, block growth, temporary region
// round trips and scratch scopes.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kiln_mem::Arena;

/// Benchmark batches of same-size allocations followed by a reset.
fn bench_sequential_allocations(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_alloc");

    for size in &[4, 16, 64, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut arena = Arena::new(64 * 1024).unwrap();
            b.iter(|| {
                for _ in 0..32 {
                    black_box(arena.alloc(black_box(size)).unwrap());
                }
                arena.reset();
            });
        });
    }

    group.finish();
}

/// Benchmark mixed sizes and alignments.
fn bench_mixed_allocations(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_alloc");

    group.bench_function("variable_sizes", |b| {
        let mut arena = Arena::new(64 * 1024).unwrap();
        let requests = [(4, 4), (16, 8), (64, 16), (256, 64), (1024, 128)];

        b.iter(|| {
            for &(size, align) in &requests {
                black_box(arena.alloc_aligned(black_box(size), align).unwrap());
            }
            arena.reset();
        });
    });

    group.finish();
}

/// Benchmark growth: every few allocations spill into a new block.
fn bench_block_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_growth");
    group.sample_size(100);

    group.bench_function("small_blocks", |b| {
        b.iter(|| {
            let mut arena = Arena::new(1024).unwrap();
            for _ in 0..100 {
                black_box(arena.alloc(black_box(64)).unwrap());
            }
            black_box(arena.block_count())
        });
    });

    group.finish();
}

/// Benchmark a temporary region round trip with a handful of allocations.
fn bench_temp_regions(c: &mut Criterion) {
    let mut group = c.benchmark_group("temp_region");

    group.bench_function("begin_alloc_end", |b| {
        let mut arena = Arena::new(64 * 1024).unwrap();
        b.iter(|| {
            let marker = arena.temp_begin().unwrap();
            for _ in 0..8 {
                black_box(arena.alloc(128).unwrap());
            }
            arena.temp_end(marker).unwrap();
        });
    });

    group.bench_function("scratch_scope", |b| {
        let mut arena = Arena::new(64 * 1024).unwrap();
        b.iter(|| {
            let mut scratch = arena.scratch().unwrap();
            for _ in 0..8 {
                black_box(scratch.alloc(128).unwrap());
            }
        });
    });

    group.finish();
}

/// Benchmark the O(blocks) statistics walk.
fn bench_arena_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_stats");

    group.bench_function("stats", |b| {
        let mut arena = Arena::new(4096).unwrap();
        for _ in 0..10 {
            arena.alloc(4096).unwrap();
        }

        b.iter(|| black_box(arena.stats()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sequential_allocations,
    bench_mixed_allocations,
    bench_block_growth,
    bench_temp_regions,
    bench_arena_stats,
);
criterion_main!(benches);
