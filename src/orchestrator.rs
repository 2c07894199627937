//! The composite cache orchestrator: `get`/`set`/`remove`/`get_or_set` over an L1 store,
//! an L2 store, the stampede guard, and (optionally) a backplane, operating on raw bytes
//! via a byte-oriented, fail-safe-aware design. The codec is a generic parameter rather
//! than a trait object: `CacheCodec::serialize`/`deserialize` are generic over the value
//! type, which makes the trait object-safe only when monomorphized, not when boxed as
//! `dyn`. `get_or_set` takes `self: &Arc<Self>` rather than `&self`: a soft-timeout race
//! needs to hand the refresh off to a detached task that outlives the caller who hit the
//! soft deadline, and that requires an owned, `'static` handle to the orchestrator.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration as ChronoDuration;
use rand::Rng;
use tracing::{debug, warn};

use crate::backplane::{BackplanePublisher, InvalidationEvent, InvalidationHandler};
use crate::clock::{Clock, SystemClock};
use crate::codecs::{CacheCodec, JsonCodec};
use crate::entry::{CachedValue, EntryMetadata, EntryState};
use crate::error::{CachifyError, StaleReason};
use crate::key::{build_key, meta_key};
use crate::metrics;
use crate::options::{CachifyConfig, EntryOptions, ResilienceOptions};
use crate::stampede::{join, Acquired, Joined, StampedeGuard};
use crate::store::Store;

/// What [`CacheOrchestrator::get`] returns: a fresh or stale value, or a miss. Fresh and
/// stale carry the same payload shape ("possibly stale — indistinguishable at the API");
/// callers that care about staleness match on the variant or inspect `reason`.
#[derive(Debug, Clone)]
pub enum GetResult<T> {
    Fresh(T),
    Stale { value: T, reason: StaleReason },
    Miss,
}

impl<T> GetResult<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, GetResult::Stale { .. })
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            GetResult::Fresh(v) | GetResult::Stale { value: v, .. } => Some(v),
            GetResult::Miss => None,
        }
    }
}

struct StaleCandidate<T> {
    value: T,
    reason: StaleReason,
}

pub struct CacheOrchestrator<C: CacheCodec = JsonCodec> {
    l1: Arc<dyn Store>,
    l2: Arc<dyn Store>,
    codec: C,
    clock: Arc<dyn Clock>,
    config: CachifyConfig,
    backplane: Option<Arc<dyn BackplanePublisher>>,
    instance_id: String,
    stampede: Arc<StampedeGuard<Vec<u8>>>,
}

impl CacheOrchestrator<JsonCodec> {
    pub fn new(l1: Arc<dyn Store>, l2: Arc<dyn Store>, config: CachifyConfig) -> Self {
        Self::with_collaborators(l1, l2, config, JsonCodec, Arc::new(SystemClock), None)
    }
}

impl<C: CacheCodec> CacheOrchestrator<C> {
    pub fn with_collaborators(
        l1: Arc<dyn Store>,
        l2: Arc<dyn Store>,
        config: CachifyConfig,
        codec: C,
        clock: Arc<dyn Clock>,
        backplane: Option<Arc<dyn BackplanePublisher>>,
    ) -> Self {
        let instance_id = config
            .backplane
            .instance_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            l1,
            l2,
            codec,
            clock,
            config,
            backplane,
            instance_id,
            stampede: Arc::new(StampedeGuard::new()),
        }
    }

    fn effective_key(&self, key: &str, opts: Option<&EntryOptions>) -> String {
        let prefix = opts
            .and_then(|o| o.key_prefix.as_deref())
            .or(self.config.key_prefix.as_deref());
        build_key(prefix, None, key)
    }

    fn apply_jitter(&self, ttl: StdDuration, ratio: f64) -> StdDuration {
        if ratio <= 0.0 {
            return ttl;
        }
        let ratio = ratio.min(0.999);
        let perturbation: f64 = rand::thread_rng().gen_range(-ratio..=ratio);
        let millis = (ttl.as_millis() as f64 * (1.0 + perturbation)).max(1.0);
        StdDuration::from_millis(millis as u64)
    }

    async fn read_tier(&self, store: &Arc<dyn Store>, key: &str) -> Option<(Vec<u8>, Option<EntryMetadata>)> {
        let payload = store.get(key).await?;
        let meta_bytes = store.get(&meta_key(key)).await;
        let metadata = meta_bytes.and_then(|b| self.codec.deserialize::<EntryMetadata>(&b).ok());
        Some((payload, metadata))
    }

    async fn read_l2(&self, key: &str) -> anyhow::Result<Option<(Vec<u8>, Option<EntryMetadata>)>> {
        let payload = match self.l2.get(key).await {
            Some(p) => p,
            None => return Ok(None),
        };
        let meta_bytes = self.l2.get(&meta_key(key)).await;
        let metadata = meta_bytes.and_then(|b| self.codec.deserialize::<EntryMetadata>(&b).ok());
        Ok(Some((payload, metadata)))
    }

    async fn refill_l1(&self, key: &str, payload: &[u8], metadata: Option<EntryMetadata>, now: chrono::DateTime<chrono::Utc>) {
        let Some(meta) = metadata else { return };
        let remaining = meta.fail_safe_until - now;
        if remaining <= ChronoDuration::zero() {
            return;
        }
        let ttl = StdDuration::from_millis(remaining.num_milliseconds().max(1) as u64);
        if self.l1.set(key, payload, ttl).await.is_err() {
            debug!("L1 refill failed, ignoring");
            return;
        }
        if let Ok(meta_bytes) = self.codec.serialize(&meta) {
            let _ = self.l1.set(&meta_key(key), &meta_bytes, ttl).await;
        }
    }

    /// Raw byte-level read shared by the typed `get` and by the stampede follower path, which
    /// only needs to deserialize once.
    async fn get_raw(&self, effective_key: &str) -> Result<GetResult<Vec<u8>>, CachifyError> {
        let now = self.clock.now();
        let mut stale: Option<StaleCandidate<Vec<u8>>> = None;

        if let Some((payload, metadata)) = self.read_tier(&self.l1, effective_key).await {
            let cached = CachedValue::new(payload, metadata, now);
            match cached.state {
                EntryState::Fresh => {
                    metrics::record_hit("L1");
                    return Ok(GetResult::Fresh(cached.value));
                }
                EntryState::Stale => {
                    stale = Some(StaleCandidate { value: cached.value, reason: StaleReason::Expired });
                }
                EntryState::Miss => {}
            }
        }

        match self.read_l2(effective_key).await {
            Ok(Some((payload, metadata))) => {
                let cached = CachedValue::new(payload, metadata, now);
                match cached.state {
                    EntryState::Fresh => {
                        metrics::record_hit("L2");
                        self.refill_l1(effective_key, &cached.value, cached.metadata, now).await;
                        return Ok(GetResult::Fresh(cached.value));
                    }
                    EntryState::Stale if stale.is_none() => {
                        stale = Some(StaleCandidate { value: cached.value, reason: StaleReason::Expired });
                    }
                    _ => {}
                }
            }
            Ok(None) => {}
            Err(e) => {
                if let Some(candidate) = stale {
                    metrics::record_hit("stale");
                    metrics::record_stale_served();
                    metrics::record_failsafe_used();
                    debug!("cachify.stale" = true, "cachify.stale_reason" = %StaleReason::L2Failure, "serving stale value after L2 read failure");
                    return Ok(GetResult::Stale { value: candidate.value, reason: StaleReason::L2Failure });
                }
                if self.config.fail_fast_on_l2_errors {
                    return Err(CachifyError::DistributedStore(e));
                }
                warn!(error = %e, "L2 read failed; treating as miss per policy");
            }
        }

        if let Some(candidate) = stale {
            metrics::record_hit("stale");
            metrics::record_stale_served();
            metrics::record_failsafe_used();
            debug!("cachify.stale" = true, "cachify.stale_reason" = %candidate.reason, "serving stale value within fail-safe window");
            return Ok(GetResult::Stale { value: candidate.value, reason: candidate.reason });
        }

        metrics::record_miss();
        Ok(GetResult::Miss)
    }

    /// `Get(key) -> value? | Stale<value> | Miss`.
    pub async fn get<T>(&self, key: &str) -> Result<GetResult<T>, CachifyError>
    where
        T: serde::de::DeserializeOwned,
    {
        let start = std::time::Instant::now();
        let effective_key = self.effective_key(key, None);
        let raw = self.get_raw(&effective_key).await?;
        metrics::record_get_duration_ms(start.elapsed().as_secs_f64() * 1000.0);
        match raw {
            GetResult::Fresh(bytes) => Ok(GetResult::Fresh(self.codec.deserialize(&bytes).map_err(CachifyError::SerializationFailure)?)),
            GetResult::Stale { value, reason } => Ok(GetResult::Stale {
                value: self.codec.deserialize(&value).map_err(CachifyError::SerializationFailure)?,
                reason,
            }),
            GetResult::Miss => Ok(GetResult::Miss),
        }
    }

    /// `Set(key, value, options?)`.
    pub async fn set<T>(&self, key: &str, value: &T, opts: Option<EntryOptions>) -> Result<(), CachifyError>
    where
        T: serde::Serialize,
    {
        let effective_key = self.effective_key(key, opts.as_ref());
        let now = self.clock.now();

        let ttl = opts.as_ref().and_then(|o| o.ttl).unwrap_or(self.config.default_ttl);
        let jitter_ratio = opts.as_ref().and_then(|o| o.jitter_ratio).unwrap_or(self.config.jitter_ratio);
        let resilience = opts
            .as_ref()
            .and_then(|o| o.resilience.clone())
            .unwrap_or_else(|| self.config.resilience.clone());

        let ttl = self.apply_jitter(ttl, jitter_ratio);
        let fail_safe = ChronoDuration::from_std(resilience.fail_safe_max_duration).unwrap_or_default();
        let metadata = EntryMetadata::new(now, ChronoDuration::from_std(ttl).unwrap_or_default(), fail_safe);

        let payload = self.codec.serialize(value).map_err(CachifyError::SerializationFailure)?;
        let meta_bytes = self.codec.serialize(&metadata).map_err(CachifyError::SerializationFailure)?;
        let storage_ttl = StdDuration::from_millis(metadata.storage_ttl().num_milliseconds().max(1) as u64);

        if let Err(e) = self.l2.set(&effective_key, &payload, storage_ttl).await {
            warn!(error = %e, "L2 write failed");
            if self.config.fail_fast_on_l2_errors {
                return Err(CachifyError::DistributedStore(e));
            }
        } else {
            let _ = self.l2.set(&meta_key(&effective_key), &meta_bytes, storage_ttl).await;
        }

        let _ = self.l1.set(&effective_key, &payload, storage_ttl).await;
        let _ = self.l1.set(&meta_key(&effective_key), &meta_bytes, storage_ttl).await;

        metrics::record_set();
        self.publish_invalidation(InvalidationEvent::key(effective_key, self.instance_id.clone())).await;
        Ok(())
    }

    /// `Remove(key)`.
    pub async fn remove(&self, key: &str) -> Result<(), CachifyError> {
        let effective_key = self.effective_key(key, None);
        let _ = self.l1.remove(&effective_key).await;
        let _ = self.l1.remove(&meta_key(&effective_key)).await;
        if let Err(e) = self.l2.remove(&effective_key).await {
            if self.config.fail_fast_on_l2_errors {
                return Err(CachifyError::DistributedStore(e));
            }
            warn!(error = %e, "L2 remove failed");
        }
        let _ = self.l2.remove(&meta_key(&effective_key)).await;
        metrics::record_remove();
        self.publish_invalidation(InvalidationEvent::key(effective_key, self.instance_id.clone())).await;
        Ok(())
    }

    async fn publish_invalidation(&self, event: InvalidationEvent) {
        if let Some(backplane) = &self.backplane {
            if let Err(e) = backplane.publish(event).await {
                warn!(error = %e, "backplane publish failed, primary operation unaffected");
            }
        }
    }

    /// Handle an invalidation delivered by the backplane subscriber: evict L1 only, never L2.
    pub async fn apply_invalidation(&self, event: &InvalidationEvent) {
        if event.source_id == self.instance_id {
            return;
        }
        if let Some(key) = &event.key {
            let _ = self.l1.remove(key).await;
            let _ = self.l1.remove(&meta_key(key)).await;
        }
        if event.tag.is_some() {
            debug!("tag-based invalidation received but not acted upon (out of core scope)");
        }
    }
}

/// Lets a [`crate::backplane::redis_backplane::RedisSubscriber`] (or any other transport)
/// dispatch delivered invalidations straight to the orchestrator's own
/// [`CacheOrchestrator::apply_invalidation`].
#[async_trait::async_trait]
impl<C: CacheCodec + 'static> InvalidationHandler for CacheOrchestrator<C> {
    async fn handle(&self, event: InvalidationEvent) {
        self.apply_invalidation(&event).await;
    }
}

/// `GetOrSet(key, factory, options?)`, implemented as a free function taking
/// `Arc<CacheOrchestrator<C>>` so the soft-timeout path can hand a refresh off to a
/// detached task.
pub async fn get_or_set<C, T, F, Fut>(
    orchestrator: &Arc<CacheOrchestrator<C>>,
    key: &str,
    factory: F,
    opts: Option<EntryOptions>,
) -> Result<T, CachifyError>
where
    C: CacheCodec + 'static,
    T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
{
    match orchestrator.get::<T>(key).await? {
        GetResult::Fresh(value) => return Ok(value),
        GetResult::Stale { value, reason } => {
            return refresh_with_stale_fallback(orchestrator, key, factory, opts, value, reason).await;
        }
        GetResult::Miss => {}
    }

    let effective_key = orchestrator.effective_key(key, opts.as_ref());
    match orchestrator.stampede.acquire(&effective_key) {
        Acquired::Lead(leader) => {
            // Re-check under the lock: another leader may have just populated
            // the value between our first `get` and acquiring the slot.
            if let GetResult::Fresh(value) = orchestrator.get::<T>(key).await? {
                drop(leader);
                return Ok(value);
            }
            let resilience = opts
                .as_ref()
                .and_then(|o| o.resilience.clone())
                .unwrap_or_else(|| orchestrator.config.resilience.clone());
            match run_factory(factory, resilience.hard_timeout).await {
                Ok(value) => {
                    let bytes = orchestrator.codec.serialize(&value).map_err(CachifyError::SerializationFailure)?;
                    leader.publish(Arc::new(bytes));
                    orchestrator.set(key, &value, opts).await?;
                    Ok(value)
                }
                Err(CachifyError::HardTimeout) => {
                    drop(leader);
                    metrics::record_hard_timeout();
                    warn!("cachify.timeout_type" = "hard", "factory exceeded hard timeout with no stale candidate available");
                    Err(CachifyError::HardTimeout)
                }
                Err(e) => {
                    drop(leader);
                    Err(e)
                }
            }
        }
        Acquired::Follow(rx) => match join(rx).await {
            Joined::Value(bytes) => orchestrator.codec.deserialize(&bytes).map_err(CachifyError::SerializationFailure),
            Joined::Lost => Err(CachifyError::FactoryFailure(anyhow::anyhow!("shared refresh task was lost"))),
        },
    }
}

async fn refresh_with_stale_fallback<C, T, F, Fut>(
    orchestrator: &Arc<CacheOrchestrator<C>>,
    key: &str,
    factory: F,
    opts: Option<EntryOptions>,
    stale_value: T,
    _reason: StaleReason,
) -> Result<T, CachifyError>
where
    C: CacheCodec + 'static,
    T: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let effective_key = orchestrator.effective_key(key, opts.as_ref());
    let resilience = opts
        .as_ref()
        .and_then(|o| o.resilience.clone())
        .unwrap_or_else(|| orchestrator.config.resilience.clone());

    match orchestrator.stampede.acquire(&effective_key) {
        Acquired::Follow(rx) => race_soft_timeout_follow(orchestrator, rx, stale_value, &resilience).await,
        Acquired::Lead(leader) => {
            // Spawn the refresh as a detached, uncancelable task: a caller that
            // only waits for the soft timeout must not abort it by returning early.
            let orch = Arc::clone(orchestrator);
            let key_owned = key.to_string();
            let opts_owned = opts.clone();
            let hard_timeout = resilience.hard_timeout;
            debug!("cachify.refresh_scheduled" = true, "background refresh spawned for stale key");
            let handle = tokio::spawn(async move {
                let outcome = run_factory(factory, hard_timeout).await;
                match outcome {
                    Ok(value) => {
                        if let Ok(bytes) = orch.codec.serialize(&value) {
                            leader.publish(Arc::new(bytes));
                        }
                        let _ = orch.set(&key_owned, &value, opts_owned).await;
                    }
                    Err(_) => {
                        // leader dropped here without publishing; followers
                        // see a `Lost` join and fall back to their own stale
                        // candidate.
                    }
                }
            });

            if let Some(soft) = resilience.soft_timeout {
                tokio::select! {
                    result = handle => {
                        match result {
                            Ok(()) => {
                                match orchestrator.get::<T>(key).await? {
                                    GetResult::Fresh(v) => Ok(v),
                                    _ => Ok(stale_value),
                                }
                            }
                            Err(_) => Ok(stale_value),
                        }
                    }
                    _ = tokio::time::sleep(soft) => {
                        metrics::record_soft_timeout();
                        metrics::record_stale_served();
                        debug!(
                            "cachify.stale" = true,
                            "cachify.stale_reason" = %StaleReason::SoftTimeout,
                            "cachify.timeout_type" = "soft",
                            "cachify.refresh_scheduled" = true,
                            "soft timeout elapsed, serving stale value while refresh continues"
                        );
                        Ok(stale_value)
                    }
                }
            } else {
                match handle.await {
                    Ok(()) => match orchestrator.get::<T>(key).await? {
                        GetResult::Fresh(v) => Ok(v),
                        _ => Ok(stale_value),
                    },
                    Err(_) => Ok(stale_value),
                }
            }
        }
    }
}

async fn race_soft_timeout_follow<C, T>(
    orchestrator: &Arc<CacheOrchestrator<C>>,
    rx: tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>,
    stale_value: T,
    resilience: &ResilienceOptions,
) -> Result<T, CachifyError>
where
    C: CacheCodec,
    T: serde::de::DeserializeOwned,
{
    match resilience.soft_timeout {
        Some(soft) => {
            tokio::select! {
                joined = join(rx) => match joined {
                    Joined::Value(bytes) => orchestrator.codec.deserialize(&bytes).map_err(CachifyError::SerializationFailure),
                    Joined::Lost => Ok(stale_value),
                },
                _ = tokio::time::sleep(soft) => {
                    metrics::record_soft_timeout();
                    metrics::record_stale_served();
                    debug!(
                        "cachify.stale" = true,
                        "cachify.stale_reason" = %StaleReason::SoftTimeout,
                        "cachify.timeout_type" = "soft",
                        "cachify.refresh_scheduled" = true,
                        "follower's soft timeout elapsed while waiting on the leader's refresh"
                    );
                    Ok(stale_value)
                }
            }
        }
        None => match join(rx).await {
            Joined::Value(bytes) => orchestrator.codec.deserialize(&bytes).map_err(CachifyError::SerializationFailure),
            Joined::Lost => Ok(stale_value),
        },
    }
}

async fn run_factory<T, F, Fut>(factory: F, hard_timeout: Option<StdDuration>) -> Result<T, CachifyError>
where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = anyhow::Result<T>> + Send,
{
    let result = if let Some(timeout) = hard_timeout {
        match tokio::time::timeout(timeout, factory()).await {
            Ok(inner) => inner,
            Err(_) => return Err(CachifyError::HardTimeout),
        }
    } else {
        factory().await
    };
    result.map_err(CachifyError::FactoryFailure)
}
