//! Fluent construction of a [`Cachify`](crate::Cachify) facade: a builder that defaults
//! to Moka L1 + Redis L2 and lets callers override tiers, then a `build()` that
//! assembles the final facade. Status lines use `tracing::info!`, per this crate's
//! logging convention.

use crate::backplane::BackplanePublisher;
use crate::clock::{Clock, SystemClock};
use crate::options::CachifyConfig;
use crate::orchestrator::CacheOrchestrator;
use crate::store::Store;
use crate::Cachify;
use std::sync::Arc;
use tracing::info;

/// Builds a [`Cachify`] facade, defaulting to an in-memory L1 and a Redis L2. This
/// exposes no codec customization: the facade is fixed to [`crate::codecs::JsonCodec`],
/// the same default the orchestrator's generic `C` parameter carries.
pub struct CachifyBuilder {
    l1: Option<Arc<dyn Store>>,
    l2: Option<Arc<dyn Store>>,
    clock: Arc<dyn Clock>,
    backplane: Option<Arc<dyn BackplanePublisher>>,
    config: CachifyConfig,
}

impl Default for CachifyBuilder {
    fn default() -> Self {
        Self {
            l1: None,
            l2: None,
            clock: Arc::new(SystemClock),
            backplane: None,
            config: CachifyConfig::default(),
        }
    }
}

impl CachifyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_l1(mut self, store: Arc<dyn Store>) -> Self {
        self.l1 = Some(store);
        self
    }

    pub fn with_l2(mut self, store: Arc<dyn Store>) -> Self {
        self.l2 = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_backplane(mut self, backplane: Arc<dyn BackplanePublisher>) -> Self {
        self.backplane = Some(backplane);
        self
    }

    pub fn with_config(mut self, config: CachifyConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the facade. When no L1 was supplied, defaults to
    /// [`crate::store::moka_store::MemoryStore`] (feature `moka`); when no L2 was supplied,
    /// defaults to [`crate::store::redis_store::DistributedStore`] connecting via `REDIS_URL`
    /// (feature `redis`). When `config.backplane.enabled` is set and no explicit backplane
    /// was supplied via [`Self::with_backplane`], this also provisions a Redis Pub/Sub
    /// publisher and starts a subscriber that feeds invalidations straight back into the
    /// orchestrator's own L1 (feature `redis`).
    pub async fn build(self) -> anyhow::Result<Cachify> {
        let l1: Arc<dyn Store> = match self.l1 {
            Some(store) => store,
            #[cfg(feature = "moka")]
            None => {
                info!("no L1 store configured, defaulting to in-memory Moka store");
                Arc::new(crate::store::moka_store::MemoryStore::new())
            }
            #[cfg(not(feature = "moka"))]
            None => anyhow::bail!("no L1 store configured and the `moka` feature is disabled"),
        };

        let l2: Arc<dyn Store> = match self.l2 {
            Some(store) => store,
            #[cfg(feature = "redis")]
            None => {
                info!("no L2 store configured, defaulting to Redis via REDIS_URL");
                Arc::new(crate::store::redis_store::DistributedStore::new().await?)
            }
            #[cfg(not(feature = "redis"))]
            None => anyhow::bail!("no L2 store configured and the `redis` feature is disabled"),
        };

        let auto_provision_backplane = self.backplane.is_none() && self.config.backplane.enabled;

        #[cfg(feature = "redis")]
        let auto_publisher = if auto_provision_backplane {
            let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
            let stats = Arc::new(crate::backplane::BackplaneStats::default());
            let publisher =
                crate::backplane::redis_backplane::RedisPublisher::new(&redis_url, self.config.backplane.channel_name.clone(), stats)
                    .await?;
            Some(Arc::new(publisher) as Arc<dyn BackplanePublisher>)
        } else {
            None
        };
        #[cfg(not(feature = "redis"))]
        let auto_publisher: Option<Arc<dyn BackplanePublisher>> = None;

        let backplane = self.backplane.or(auto_publisher);
        let channel_name = self.config.backplane.channel_name.clone();

        let orchestrator = Arc::new(CacheOrchestrator::with_collaborators(
            l1.clone(),
            l2.clone(),
            self.config,
            crate::codecs::JsonCodec,
            self.clock,
            backplane,
        ));

        #[cfg(feature = "redis")]
        let backplane_subscriber = if auto_provision_backplane {
            let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
            let stats = Arc::new(crate::backplane::BackplaneStats::default());
            let subscriber = crate::backplane::redis_backplane::RedisSubscriber::new(&redis_url, channel_name, stats)?;
            subscriber.start(Arc::clone(&orchestrator) as Arc<dyn crate::backplane::InvalidationHandler>);
            info!("backplane subscriber started");
            Some(Arc::new(subscriber))
        } else {
            None
        };
        #[cfg(not(feature = "redis"))]
        let backplane_subscriber: Option<()> = None;

        info!("cachify facade initialized");
        Ok(Cachify { orchestrator, l1, l2, backplane_subscriber })
    }
}
