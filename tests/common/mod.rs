//! Shared integration-test infrastructure.
//!
//! These tests exercise the real Moka/Redis backends rather than mocks. They assume a
//! reachable Redis at `REDIS_URL` (default `redis://127.0.0.1:6379`); run `redis-server`
//! locally before `cargo test --test '*'`.

use cachify::clock::{Clock, ManualClock};
use cachify::{Cachify, CachifyConfig};
use std::sync::Arc;

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// A unique key per test run, so concurrent `cargo test` invocations against the
/// same Redis instance don't collide.
pub fn test_key(name: &str) -> String {
    format!("itest:{name}:{}", rand::random::<u32>())
}

/// Build a default facade (Moka L1 + Redis L2) pointed at `REDIS_URL`.
pub async fn setup_cache() -> anyhow::Result<Cachify> {
    unsafe { std::env::set_var("REDIS_URL", redis_url()); }
    Cachify::new().await
}

/// Build a facade with custom configuration, e.g. to enable the backplane.
pub async fn setup_cache_with_config(config: CachifyConfig) -> anyhow::Result<Cachify> {
    unsafe { std::env::set_var("REDIS_URL", redis_url()); }
    Cachify::builder().with_config(config).build().await
}

/// Build a facade backed by a [`ManualClock`], returning both the facade and a handle to
/// advance time deterministically. Needed for tests of fail-safe/soft-timeout behavior,
/// which depend on logical time passing without actually sleeping for real durations.
pub async fn setup_cache_with_clock(config: CachifyConfig) -> anyhow::Result<(Cachify, Arc<ManualClock>)> {
    unsafe { std::env::set_var("REDIS_URL", redis_url()); }
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let cache = Cachify::builder().with_config(config).with_clock(Arc::clone(&clock) as Arc<dyn Clock>).build().await?;
    Ok((cache, clock))
}

pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct User {
        pub id: u64,
        pub name: String,
        pub email: String,
    }

    impl User {
        pub fn new(id: u64) -> Self {
            Self { id, name: format!("User {id}"), email: format!("user{id}@example.com") }
        }
    }
}

/// Poll `condition` until it's true or `timeout_ms` elapses.
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
