//! Benchmarks for the stampede guard: cost of coalescing N concurrent misses
//! on the same key into a single factory run, versus N misses on distinct keys.

use cachify::{get_or_set, CacheOrchestrator, CachifyConfig, Store};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Value {
    n: u64,
}

fn orchestrator() -> Arc<CacheOrchestrator> {
    let l1: Arc<dyn Store> = Arc::new(cachify::store::moka_store::MemoryStore::new());
    let l2: Arc<dyn Store> = Arc::new(cachify::store::moka_store::MemoryStore::new());
    Arc::new(CacheOrchestrator::new(l1, l2, CachifyConfig::default()))
}

fn bench_coalesced_misses(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("stampede_coalesced");

    for concurrency in &[2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::new("same_key", concurrency), concurrency, |b, &concurrency| {
            b.iter(|| {
                let orch = orchestrator();
                rt.block_on(async {
                    let mut handles = Vec::with_capacity(concurrency);
                    for _ in 0..concurrency {
                        let orch = Arc::clone(&orch);
                        handles.push(tokio::spawn(async move {
                            get_or_set(&orch, "shared", || async { Ok(Value { n: 1 }) }, None).await
                        }));
                    }
                    for h in handles {
                        h.await.expect("task").expect("get_or_set");
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_distinct_keys(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    c.bench_function("stampede_distinct_keys_32", |b| {
        b.iter(|| {
            let orch = orchestrator();
            rt.block_on(async {
                let mut handles = Vec::with_capacity(32);
                for i in 0..32u64 {
                    let orch = Arc::clone(&orch);
                    handles.push(tokio::spawn(async move {
                        get_or_set(&orch, &format!("key:{i}"), move || async move { Ok(Value { n: i }) }, None).await
                    }));
                }
                for h in handles {
                    h.await.expect("task").expect("get_or_set");
                }
            });
        });
    });
}

criterion_group!(benches, bench_coalesced_misses, bench_distinct_keys);
criterion_main!(benches);
