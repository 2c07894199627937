//! Integration tests for fail-safe and soft-timeout resilience, driven by a
//! `ManualClock` so staleness windows advance deterministically instead of requiring
//! real sleeps long enough to outlast a TTL.

mod common;

use common::{setup_cache_with_clock, test_data::User, test_key};
use cachify::{CachifyConfig, EntryOptions, GetResult, ResilienceOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn stale_value_is_served_within_the_fail_safe_window() {
    let config = CachifyConfig { resilience: ResilienceOptions { fail_safe_max_duration: Duration::from_secs(300), ..Default::default() }, ..Default::default() };
    let (cache, clock) = setup_cache_with_clock(config).await.expect("cache");
    let key = test_key("fail-safe");

    cache.set(&key, &User::new(1), Some(EntryOptions { ttl: Some(Duration::from_secs(1)), ..Default::default() })).await.expect("set");

    clock.advance(chrono::Duration::seconds(5));

    match cache.get::<User>(&key).await.expect("get") {
        GetResult::Stale { value, reason } => {
            assert_eq!(value, User::new(1));
            assert_eq!(reason, cachify::StaleReason::Expired);
        }
        other => panic!("expected a stale hit within the fail-safe window, got {other:?}"),
    }
}

#[tokio::test]
async fn soft_timeout_serves_stale_while_a_background_refresh_completes() {
    let config = CachifyConfig {
        resilience: ResilienceOptions { fail_safe_max_duration: Duration::from_secs(300), ..Default::default() },
        ..Default::default()
    };
    let (cache, clock) = setup_cache_with_clock(config).await.expect("cache");
    let cache = Arc::new(cache);
    let key = test_key("soft-timeout");

    cache.set(&key, &User::new(1), Some(EntryOptions { ttl: Some(Duration::from_secs(1)), ..Default::default() })).await.expect("set");
    clock.advance(chrono::Duration::seconds(5));

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = Arc::clone(&calls);
    let opts = EntryOptions { resilience: Some(ResilienceOptions { soft_timeout: Some(Duration::from_millis(20)), ..Default::default() }), ..Default::default() };

    let result = cache
        .get_or_set(
            &key,
            move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(User::new(2))
                }
            },
            Some(opts),
        )
        .await
        .expect("get_or_set");

    assert_eq!(result, User::new(1), "a caller hitting the soft timeout should get the stale value immediately");

    let mut refreshed = false;
    for _ in 0..50 {
        if matches!(cache.get::<User>(&key).await, Ok(GetResult::Fresh(v)) if v == User::new(2)) {
            refreshed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refreshed, "the background refresh should eventually land the factory's new value");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
