//! Batched publisher decorator: wraps a plain [`BackplanePublisher`] behind a small
//! stateful adapter. A batch of size 1 (the default, see
//! [`crate::options::BackplaneConfig::default`]) degenerates to publishing
//! each event immediately, so this type is safe to use unconditionally rather than
//! branching between "batched" and "immediate" publisher types at construction.

use super::{BackplanePublisher, InvalidationEvent, InvalidationItem, WireEnvelope, WIRE_VERSION};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

/// Wraps an inner publisher and coalesces events into batches of at most `batch_size`,
/// flushed either when full or after `batch_window` elapses since the first event in the
/// batch — whichever comes first. The window is armed by a single-shot `tokio::spawn`ed
/// timer started when an event lands in an otherwise-empty batch; a `generation` counter
/// lets a timer that fires after its batch was already flushed by size notice it's stale
/// and do nothing, rather than flushing an empty (or a newer, unrelated) batch.
pub struct BatchingPublisher<P: BackplanePublisher> {
    inner: Arc<P>,
    source_id: String,
    batch_size: usize,
    batch_window: Duration,
    pending: Arc<Mutex<Vec<InvalidationEvent>>>,
    generation: Arc<AtomicU64>,
}

impl<P: BackplanePublisher + 'static> BatchingPublisher<P> {
    pub fn new(inner: Arc<P>, source_id: String, batch_size: usize, batch_window: Duration) -> Self {
        Self {
            inner,
            source_id,
            batch_size: batch_size.max(1),
            batch_window,
            pending: Arc::new(Mutex::new(Vec::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn flush_locked(&self, batch: Vec<InvalidationEvent>) -> anyhow::Result<()> {
        flush_batch(self.inner.as_ref(), &self.source_id, batch).await
    }

    /// Flush whatever is currently pending, regardless of batch size or window.
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let batch = std::mem::take(&mut *self.pending.lock().await);
        self.flush_locked(batch).await
    }

    /// Spawn the single-shot window timer for the batch that just received its first
    /// event. `expected_generation` is the generation at spawn time; if a size-triggered
    /// flush (or another `flush()` call) bumps the counter before the timer fires, this
    /// task finds a mismatch and flushes nothing, rather than racing the batch it no
    /// longer owns.
    fn arm_window_timer(&self, expected_generation: u64) {
        let inner = Arc::clone(&self.inner);
        let source_id = self.source_id.clone();
        let pending = Arc::clone(&self.pending);
        let generation = Arc::clone(&self.generation);
        let window = self.batch_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut pending = pending.lock().await;
            if generation.compare_exchange(expected_generation, expected_generation + 1, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                return;
            }
            let batch = std::mem::take(&mut *pending);
            drop(pending);
            let _ = flush_batch(inner.as_ref(), &source_id, batch).await;
        });
    }
}

async fn flush_batch<P: BackplanePublisher>(inner: &P, source_id: &str, mut batch: Vec<InvalidationEvent>) -> anyhow::Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    if batch.len() == 1 {
        let event = batch.remove(0);
        return inner.publish(event).await;
    }
    let items = batch.into_iter().map(|event| InvalidationItem { key: event.key, tag: event.tag }).collect();
    let envelope = WireEnvelope { v: WIRE_VERSION, src: source_id.to_string(), key: None, tag: None, items: Some(items) };
    inner.publish_envelope(envelope).await
}

#[async_trait::async_trait]
impl<P: BackplanePublisher + 'static> BackplanePublisher for BatchingPublisher<P> {
    async fn publish(&self, event: InvalidationEvent) -> anyhow::Result<()> {
        if self.batch_size <= 1 {
            return self.inner.publish(event).await;
        }

        let (batch_to_flush, arm_timer) = {
            let mut pending = self.pending.lock().await;
            let was_empty = pending.is_empty();
            pending.push(event);
            if pending.len() >= self.batch_size {
                self.generation.fetch_add(1, Ordering::SeqCst);
                (Some(std::mem::take(&mut *pending)), false)
            } else {
                (None, was_empty)
            }
        };

        if let Some(batch) = batch_to_flush {
            return self.flush_locked(batch).await;
        }

        // The first event in a fresh batch arms a single-shot timer that force-flushes
        // at `batch_window` independent of whether the batch ever fills.
        if arm_timer {
            let generation = self.generation.load(Ordering::SeqCst);
            self.arm_window_timer(generation);
        }
        Ok(())
    }
}
