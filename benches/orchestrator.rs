//! Benchmarks for the composite get/set path across Moka L1 + Moka-backed L2
//! (both in-process, so the numbers isolate orchestration overhead from
//! network latency — a real deployment benchmark would point L2 at Redis).

use cachify::{CachifyConfig, Cachify};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Payload {
    data: String,
}

fn payload(size_bytes: usize) -> Payload {
    Payload { data: "x".repeat(size_bytes) }
}

fn setup() -> (Cachify, Runtime) {
    let rt = Runtime::new().expect("tokio runtime");
    let cache = rt.block_on(async {
        let l1: Arc<dyn cachify::Store> = Arc::new(cachify::store::moka_store::MemoryStore::new());
        let l2: Arc<dyn cachify::Store> = Arc::new(cachify::store::moka_store::MemoryStore::new());
        Cachify::builder().with_l1(l1).with_l2(l2).with_config(CachifyConfig::default()).build().await.expect("cache")
    });
    (cache, rt)
}

fn bench_set(c: &mut Criterion) {
    let (cache, rt) = setup();
    let mut group = c.benchmark_group("orchestrator_set");
    for size in &[128usize, 4096, 65536] {
        let data = payload(*size);
        group.bench_with_input(BenchmarkId::new("bytes", size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let key = format!("bench:set:{}", rand::random::<u32>());
                    cache.set(&key, black_box(&data), None).await.expect("set");
                });
            });
        });
    }
    group.finish();
}

fn bench_get_hit(c: &mut Criterion) {
    let (cache, rt) = setup();
    let key = "bench:get:hit".to_string();
    rt.block_on(async {
        cache.set(&key, &payload(4096), None).await.expect("set");
    });

    c.bench_function("orchestrator_get_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = black_box(cache.get::<Payload>(&key).await.expect("get"));
            });
        });
    });
}

fn bench_get_miss(c: &mut Criterion) {
    let (cache, rt) = setup();
    c.bench_function("orchestrator_get_miss", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:miss:{}", rand::random::<u32>());
                let _ = black_box(cache.get::<Payload>(&key).await.expect("get"));
            });
        });
    });
}

criterion_group!(benches, bench_set, bench_get_hit, bench_get_miss);
criterion_main!(benches);
