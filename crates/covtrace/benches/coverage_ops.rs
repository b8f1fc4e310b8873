//! Coverage Operations Benchmarks
//!
//! Benchmarks for the identifier set and the entry collector hot path.
//!
//! Run with: `cargo bench --bench coverage_ops`

use covtrace::{AvalancheMix, CollectorConfig, DoubleBufferedCollector, IdentifierSet};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_set_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("identifier_set_insert");

    for count in [1_000u64, 10_000, 100_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{count}_dense")),
            &count,
            |bench, &n| {
                bench.iter(|| {
                    let mut set = IdentifierSet::with_capacity_bits(10);
                    for id in 0..n {
                        let _ = set.insert(black_box(0x0600_0001 + id));
                    }
                    black_box(set);
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{count}_scattered")),
            &count,
            |bench, &n| {
                bench.iter(|| {
                    let mut set = IdentifierSet::with_capacity_bits(10);
                    for id in 1..=n {
                        let _ = set.insert(black_box(id.avalanche() | 1));
                    }
                    black_box(set);
                });
            },
        );
    }

    group.finish();
}

fn bench_set_contains(c: &mut Criterion) {
    let mut set = IdentifierSet::new();
    for id in 1..=50_000u64 {
        let _ = set.insert(id << 4);
    }

    c.bench_function("identifier_set_contains_hit", |bench| {
        let mut id = 0u64;
        bench.iter(|| {
            id = id % 50_000 + 1;
            black_box(set.contains(black_box(id << 4)))
        });
    });
    c.bench_function("identifier_set_contains_miss", |bench| {
        let mut id = 0u64;
        bench.iter(|| {
            id = id % 50_000 + 1;
            black_box(set.contains(black_box((id << 4) + 1)))
        });
    });
}

fn bench_collector_append(c: &mut Criterion) {
    let collector = match DoubleBufferedCollector::start(CollectorConfig::new()) {
        Ok(collector) => collector,
        Err(e) => panic!("collector failed to start: {e}"),
    };

    c.bench_function("collector_append", |bench| {
        let mut id = 0u64;
        bench.iter(|| {
            id = id % 4_096 + 1;
            collector.append(black_box(id));
        });
    });

    collector.shutdown();
}

criterion_group!(
    benches,
    bench_set_insert,
    bench_set_contains,
    bench_collector_append
);
criterion_main!(benches);
