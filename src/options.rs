//! Per-entry options, resilience policy, and crate-wide configuration.

use std::time::Duration;

/// Resilience behavior for a `get_or_set` call: how long a stale value remains eligible,
/// and the soft/hard refresh deadlines.
#[derive(Debug, Clone)]
pub struct ResilienceOptions {
    /// How long past logical expiration a value is still eligible as a stale fallback.
    pub fail_safe_max_duration: Duration,
    /// If the shared refresh task hasn't finished by this deadline and a stale candidate
    /// exists, return the stale value and let the refresh continue.
    pub soft_timeout: Option<Duration>,
    /// If the factory hasn't finished by this deadline, cancel it.
    pub hard_timeout: Option<Duration>,
    /// When a soft/hard timeout serves a stale value, also schedule a detached background
    /// refresh using an uncancelable token.
    pub enable_background_refresh: bool,
}

impl Default for ResilienceOptions {
    fn default() -> Self {
        Self {
            fail_safe_max_duration: Duration::ZERO,
            soft_timeout: None,
            hard_timeout: None,
            enable_background_refresh: true,
        }
    }
}

/// Options attached to a single `set`/`get_or_set` call, overriding crate-wide defaults
/// for that key only.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub ttl: Option<Duration>,
    pub jitter_ratio: Option<f64>,
    pub negative_cache_ttl: Option<Duration>,
    pub key_prefix: Option<String>,
    pub serializer_name: Option<String>,
    pub resilience: Option<ResilienceOptions>,
}

/// Crate-wide configuration, built via [`crate::CachifyBuilder`].
#[derive(Debug, Clone)]
pub struct CachifyConfig {
    pub key_prefix: Option<String>,
    pub default_ttl: Duration,
    pub jitter_ratio: f64,
    pub fail_fast_on_l2_errors: bool,
    pub resilience: ResilienceOptions,
    pub backplane: BackplaneConfig,
    pub similarity: crate::similarity::SimilarityConfig,
    pub request_cache: crate::request_cache::RequestCacheConfig,
}

impl Default for CachifyConfig {
    fn default() -> Self {
        Self {
            key_prefix: None,
            default_ttl: Duration::from_secs(300),
            jitter_ratio: 0.0,
            fail_fast_on_l2_errors: false,
            resilience: ResilienceOptions::default(),
            backplane: BackplaneConfig::default(),
            similarity: crate::similarity::SimilarityConfig::default(),
            request_cache: crate::request_cache::RequestCacheConfig::default(),
        }
    }
}

/// Backplane tunables.
#[derive(Debug, Clone)]
pub struct BackplaneConfig {
    pub enabled: bool,
    pub channel_name: String,
    pub instance_id: Option<String>,
    pub batch_size: usize,
    pub batch_window: Duration,
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_name: "cachify:invalidate".to_string(),
            instance_id: None,
            batch_size: 1,
            batch_window: Duration::from_millis(0),
        }
    }
}
