//! Benchmarks for wire-envelope encode/decode/validate and batched publishing
//! overhead, using a no-op [`BackplanePublisher`] so the numbers isolate this
//! crate's own code from network latency.

use async_trait::async_trait;
use cachify::backplane::batching::BatchingPublisher;
use cachify::backplane::{BackplanePublisher, InvalidationEvent, InvalidationItem, WireEnvelope, WIRE_VERSION};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

struct NoopPublisher;

#[async_trait]
impl BackplanePublisher for NoopPublisher {
    async fn publish(&self, _event: InvalidationEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

fn sample_envelope(items: usize) -> WireEnvelope {
    if items <= 1 {
        WireEnvelope { v: WIRE_VERSION, src: "bench-instance".into(), key: Some("user:42".into()), tag: None, items: None }
    } else {
        let items = (0..items).map(|i| InvalidationItem { key: Some(format!("user:{i}")), tag: None }).collect();
        WireEnvelope { v: WIRE_VERSION, src: "bench-instance".into(), key: None, tag: None, items: Some(items) }
    }
}

fn bench_envelope_roundtrip(c: &mut Criterion) {
    let envelope = sample_envelope(1);
    c.bench_function("envelope_to_json", |b| b.iter(|| envelope.to_json().expect("serialize")));

    let json = envelope.to_json().expect("serialize");
    c.bench_function("envelope_from_json", |b| b.iter(|| WireEnvelope::from_json(black_box(&json)).expect("deserialize")));
}

fn bench_envelope_expand(c: &mut Criterion) {
    let envelope = sample_envelope(32);
    c.bench_function("envelope_expand_32_items", |b| b.iter(|| black_box(&envelope).expand()));
}

fn bench_batching_flush(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let publisher = BatchingPublisher::new(Arc::new(NoopPublisher), "bench-instance".to_string(), 32, Duration::from_millis(0));

    c.bench_function("batching_publish_32_then_flush", |b| {
        b.iter(|| {
            rt.block_on(async {
                for i in 0..31 {
                    publisher.publish(InvalidationEvent::key(format!("user:{i}"), "bench-instance".into())).await.expect("publish");
                }
                publisher.flush().await.expect("flush");
            });
        });
    });
}

criterion_group!(benches, bench_envelope_roundtrip, bench_envelope_expand, bench_batching_flush);
criterion_main!(benches);
