//! Byte-value KV store contract shared by L1 and L2. The orchestrator is polymorphic over
//! this single trait — L1 and L2 are distinguished at composition time in
//! [`crate::orchestrator::CacheOrchestrator`], not by subtype.

use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "moka")]
pub mod moka_store;
#[cfg(feature = "redis")]
pub mod redis_store;

/// A byte-addressed KV with TTL. Implemented by both the in-process L1 store and the
/// distributed L2 store; the orchestrator never assumes atomicity across keys.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the raw bytes for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store `value` under `key` with the given TTL. Implementations must apply the TTL
    /// independently per key.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// Verify the backend is reachable and operational.
    async fn health_check(&self) -> bool;

    /// Name for logging/diagnostics.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Extension for stores that can report the remaining TTL alongside the value — used by
/// the orchestrator to promote an L2 hit into L1 with an accurate TTL.
#[async_trait]
pub trait TtlIntrospectingStore: Store {
    /// Fetch the value and its remaining TTL. `Some((bytes, None))` means the key has no
    /// expiration set.
    async fn get_with_ttl(&self, key: &str) -> Option<(Vec<u8>, Option<Duration>)>;
}
