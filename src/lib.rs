//! Cachify A multi-tier caching library for Rust featuring: - **L1**: in-process caching
//! via Moka (sub-millisecond latency) - **L2**: distributed caching via Redis (shared
//! across instances) - **Stampede protection**: exactly-once refresh coalescing per key -
//! **Stale-while-revalidate**: soft/hard timeouts with fail-safe fallback to an expired
//! value rather than a hard failure - **Cross-instance invalidation**: a Redis Pub/Sub
//! backplane that evicts L1 on peers without touching the shared L2 - **Near-duplicate
//! HTTP request caching**: SimHash/LSH similarity matching as a Tower middleware layer #
//! Quick start ```rust,no_run use cachify::Cachify; #[tokio::main] async fn main() ->
//! anyhow::Result<()> { let cache = Cachify::new().await?; cache.set("user:1",
//! &serde_json::json!({"name": "alice"}), None).await?; let value:
//! Option<serde_json::Value> = cache.get("user:1").await?.into_option();
//! println!("{value:?}"); Ok(()) } ``` Redis connectivity for the default L2 store is
//! configured via the `REDIS_URL` environment variable (default
//! `redis://127.0.0.1:6379`).

use std::sync::Arc;

pub mod backplane;
pub mod clock;
pub mod codecs;
pub mod entry;
pub mod error;
pub mod key;
pub mod metrics;
pub mod options;
pub mod orchestrator;
pub mod request_cache;
pub mod similarity;
pub mod stampede;
pub mod store;

pub mod builder;

pub use builder::CachifyBuilder;
pub use codecs::JsonCodec;
pub use error::{CachifyError, StaleReason};
pub use options::{CachifyConfig, EntryOptions, ResilienceOptions};
pub use orchestrator::{get_or_set, CacheOrchestrator, GetResult};
pub use store::Store;

// Re-export async_trait for implementors of `Store`/`BackplanePublisher`/etc.
pub use async_trait::async_trait;

/// Main entry point: a composed L1 + L2 cache behind stampede protection and an optional
/// backplane. A thin, concrete facade wrapping [`CacheOrchestrator`], the more generic
/// core underneath.
#[derive(Clone)]
pub struct Cachify {
    orchestrator: Arc<CacheOrchestrator>,
    l1: Arc<dyn Store>,
    l2: Arc<dyn Store>,
    /// Kept alive only so the background subscriber task it owns keeps running; dropping the
    /// last clone of this handle stops cross-instance invalidation.
    #[cfg(feature = "redis")]
    backplane_subscriber: Option<Arc<backplane::redis_backplane::RedisSubscriber>>,
    #[cfg(not(feature = "redis"))]
    backplane_subscriber: Option<()>,
}

impl Cachify {
    /// Build a default facade: in-memory Moka L1, Redis L2 via `REDIS_URL`, no backplane. Use
    /// [`CachifyBuilder`] to customize any of these.
    pub async fn new() -> anyhow::Result<Self> {
        CachifyBuilder::new().build().await
    }

    /// Start building a customized facade.
    pub fn builder() -> CachifyBuilder {
        CachifyBuilder::new()
    }

    /// `Get(key) -> value? | Stale<value> | Miss`.
    pub async fn get<T>(&self, key: &str) -> Result<GetResult<T>, CachifyError>
    where
        T: serde::de::DeserializeOwned,
    {
        self.orchestrator.get(key).await
    }

    /// `Set(key, value, options?)`.
    pub async fn set<T>(&self, key: &str, value: &T, opts: Option<EntryOptions>) -> Result<(), CachifyError>
    where
        T: serde::Serialize,
    {
        self.orchestrator.set(key, value, opts).await
    }

    /// `Remove(key)`.
    pub async fn remove(&self, key: &str) -> Result<(), CachifyError> {
        self.orchestrator.remove(key).await
    }

    /// `GetOrSet(key, factory, options?)`: a stampede-protected read-through.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, factory: F, opts: Option<EntryOptions>) -> Result<T, CachifyError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let orchestrator = self.orchestrator.clone();
        get_or_set(&orchestrator, key, factory, opts).await
    }

    /// Access to the shared orchestrator, for callers building custom request-cache layers
    /// (see [`crate::request_cache::layer::RequestCacheLayer`]).
    pub fn orchestrator(&self) -> &Arc<CacheOrchestrator> {
        &self.orchestrator
    }

    /// Verify both tiers are reachable. `true` if L1 is operational; L2 failure alone is
    /// tolerated (graceful degradation, same contract as `get`/`set`).
    pub async fn health_check(&self) -> bool {
        let l1_ok = self.l1.health_check().await;
        let l2_ok = self.l2.health_check().await;
        if !l2_ok {
            tracing::warn!("L2 store failed health check; L1-only operation");
        }
        l1_ok
    }
}
