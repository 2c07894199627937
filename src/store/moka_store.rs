//! In-memory L1 store backed by `moka`. Values here are raw bytes rather than
//! `serde_json::Value` so the store can sit underneath any [`crate::codecs::CacheCodec`].

use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

use crate::store::Store;

/// Tuning knobs for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    pub max_capacity: u64,
    pub time_to_idle: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            time_to_idle: Duration::from_secs(120),
        }
    }
}

/// L1 cache. Per-entry TTL is enforced by storing an expiry alongside the value and
/// checking it on read, since `moka::future::Cache` only supports a single cache-wide
/// policy.
#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: std::time::Instant,
}

#[derive(Debug)]
pub struct MemoryStore {
    cache: Cache<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_idle(config.time_to_idle)
            .build();
        Self { cache }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.cache.get(key).await?;
        if entry.expires_at <= std::time::Instant::now() {
            self.cache.invalidate(key).await;
            return None;
        }
        Some(entry.bytes)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()> {
        let entry = Entry {
            bytes: value.to_vec(),
            expires_at: std::time::Instant::now() + ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Moka"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn remove_clears_entry() {
        let store = MemoryStore::new();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await, None);
    }
}
