//! Benchmarks for autoseq increments.
//!
//! Run with: cargo bench
//! View results in: target/criterion/report/index.html

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use tokio::runtime::Runtime;

use autoseq::contracts::SequenceGenerator;
use autoseq::generator::CounterSequenceGenerator;
use autoseq::storage::{DetectedApi, MemoryDatabase, RocksDbDatabase};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn create_rocks_generator() -> (CounterSequenceGenerator<DetectedApi<RocksDbDatabase>>, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = RocksDbDatabase::open(dir.path()).unwrap();
    (CounterSequenceGenerator::detect(db), dir)
}

// =============================================================================
// Single Increment Benchmarks
// =============================================================================

fn bench_increment_memory(c: &mut Criterion) {
    let rt = runtime();
    let gen = CounterSequenceGenerator::detect(MemoryDatabase::new());

    c.bench_function("increment_memory", |b| {
        b.to_async(&rt)
            .iter(|| async { gen.increment(black_box("orders"), None).await.unwrap() });
    });
}

fn bench_increment_rocksdb(c: &mut Criterion) {
    let rt = runtime();
    let (gen, _dir) = create_rocks_generator();

    c.bench_function("increment_rocksdb", |b| {
        b.to_async(&rt)
            .iter(|| async { gen.increment(black_box("orders"), None).await.unwrap() });
    });
}

// =============================================================================
// Contended Increment Benchmarks
// =============================================================================

fn bench_contended_increments(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_increments");
    let rt = runtime();

    for tasks in [1usize, 4, 16].iter() {
        let (gen, _dir) = create_rocks_generator();
        let gen = Arc::new(gen);
        let per_task = 10;

        group.throughput(Throughput::Elements((*tasks * per_task) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), tasks, |b, &tasks| {
            b.to_async(&rt).iter(|| {
                let gen = Arc::clone(&gen);
                async move {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let g = Arc::clone(&gen);
                            tokio::spawn(async move {
                                for _ in 0..per_task {
                                    g.increment("orders", None).await.unwrap();
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap();
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_increment_memory,
    bench_increment_rocksdb,
    bench_contended_increments,
);
criterion_main!(benches);
