//! Cross-instance invalidation backplane: publishers and subscribers exchange a single
//! versioned envelope `{v, src, key?, tag?, items?}` over a shared channel, since L2 is
//! authoritative here and the backplane only ever evicts L1.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod batching;
#[cfg(feature = "redis")]
pub mod redis_backplane;

/// Current wire version. Messages with a different `v` are dropped on receipt.
pub const WIRE_VERSION: u32 = 1;

/// One key or tag reference inside a (possibly batched) invalidation message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidationItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// The versioned wire envelope. `src` identifies the publishing instance; receivers
/// ignore messages whose `src` equals their own `instance_id` (echo suppression,
/// "mandatory, not optional").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireEnvelope {
    pub v: u32,
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<InvalidationItem>>,
}

impl WireEnvelope {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// A message is well-formed when its version matches, `src` is non-empty, and it carries
    /// either a single key/tag or a non-empty `items` array.
    pub fn is_valid(&self) -> bool {
        if self.v != WIRE_VERSION || self.src.is_empty() {
            return false;
        }
        let has_single = self.key.is_some() || self.tag.is_some();
        let has_items = self.items.as_ref().is_some_and(|i| !i.is_empty());
        has_single || has_items
    }

    /// Expand a (possibly batched) envelope into individual invalidation events.
    pub fn expand(&self) -> Vec<InvalidationEvent> {
        let mut out = Vec::new();
        if self.key.is_some() || self.tag.is_some() {
            out.push(InvalidationEvent {
                key: self.key.clone(),
                tag: self.tag.clone(),
                source_id: self.src.clone(),
            });
        }
        if let Some(items) = &self.items {
            for item in items {
                out.push(InvalidationEvent {
                    key: item.key.clone(),
                    tag: item.tag.clone(),
                    source_id: self.src.clone(),
                });
            }
        }
        out
    }
}

/// A single invalidation, already resolved to one key-or-tag plus its source. This is
/// what [`crate::orchestrator::CacheOrchestrator::apply_invalidation`] consumes.
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    pub key: Option<String>,
    pub tag: Option<String>,
    pub source_id: String,
}

impl InvalidationEvent {
    pub fn key(key: String, source_id: String) -> Self {
        Self { key: Some(key), tag: None, source_id }
    }

    pub fn tag(tag: String, source_id: String) -> Self {
        Self { key: None, tag: Some(tag), source_id }
    }

    fn into_envelope(self) -> WireEnvelope {
        WireEnvelope { v: WIRE_VERSION, src: self.source_id, key: self.key, tag: self.tag, items: None }
    }
}

/// Publisher side of the backplane. Implemented for both the immediate Redis publisher
/// and the batching decorator in [`batching`].
#[async_trait]
pub trait BackplanePublisher: Send + Sync {
    async fn publish(&self, event: InvalidationEvent) -> anyhow::Result<()>;

    /// Publish a pre-built envelope, e.g. a batched `items` message. The default
    /// implementation expands it and re-publishes each event individually; implementations
    /// backed by a real transport should override this to send the envelope as a single wire
    /// message.
    async fn publish_envelope(&self, envelope: WireEnvelope) -> anyhow::Result<()> {
        for event in envelope.expand() {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Handler invoked for each delivered invalidation. Handler errors are logged and never
/// halt delivery of subsequent messages.
#[async_trait]
pub trait InvalidationHandler: Send + Sync {
    async fn handle(&self, event: InvalidationEvent);
}

/// Atomic counters tracking backplane activity for observability.
#[derive(Debug, Default)]
pub struct BackplaneStats {
    pub messages_sent: std::sync::atomic::AtomicU64,
    pub messages_received: std::sync::atomic::AtomicU64,
    pub key_invalidations: std::sync::atomic::AtomicU64,
    pub tag_invalidations_ignored: std::sync::atomic::AtomicU64,
    pub processing_errors: std::sync::atomic::AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackplaneStatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub key_invalidations: u64,
    pub tag_invalidations_ignored: u64,
    pub processing_errors: u64,
}

impl BackplaneStats {
    pub fn snapshot(&self) -> BackplaneStatsSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        BackplaneStatsSnapshot {
            messages_sent: self.messages_sent.load(Relaxed),
            messages_received: self.messages_received.load(Relaxed),
            key_invalidations: self.key_invalidations.load(Relaxed),
            tag_invalidations_ignored: self.tag_invalidations_ignored.load(Relaxed),
            processing_errors: self.processing_errors.load(Relaxed),
        }
    }
}
