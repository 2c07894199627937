//! Basic get/set/remove/get_or_set behavior against real Moka + Redis tiers.

mod common;

use cachify::GetResult;
use common::{setup_cache, test_data::User, test_key};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn set_then_get_round_trips_a_struct() {
    let cache = setup_cache().await.expect("cache");
    let key = test_key("user");
    let user = User::new(1);

    cache.set(&key, &user, None).await.expect("set");

    match cache.get::<User>(&key).await.expect("get") {
        GetResult::Fresh(v) => assert_eq!(v, user),
        other => panic!("expected a fresh hit, got {}", describe(&other)),
    }
}

#[tokio::test]
async fn missing_key_is_a_miss() {
    let cache = setup_cache().await.expect("cache");
    let key = test_key("missing");
    assert!(matches!(cache.get::<User>(&key).await.expect("get"), GetResult::Miss));
}

#[tokio::test]
async fn remove_evicts_the_key() {
    let cache = setup_cache().await.expect("cache");
    let key = test_key("remove-me");
    cache.set(&key, &User::new(2), None).await.expect("set");

    cache.remove(&key).await.expect("remove");

    assert!(matches!(cache.get::<User>(&key).await.expect("get"), GetResult::Miss));
}

#[tokio::test]
async fn get_or_set_computes_once_on_a_miss_and_reuses_on_a_hit() {
    let cache = setup_cache().await.expect("cache");
    let key = test_key("computed");
    let calls = Arc::new(AtomicUsize::new(0));

    let calls_clone = Arc::clone(&calls);
    let first = cache
        .get_or_set(
            &key,
            move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(User::new(3))
                }
            },
            None,
        )
        .await
        .expect("get_or_set");
    assert_eq!(first, User::new(3));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let calls_clone = Arc::clone(&calls);
    let second = cache
        .get_or_set(
            &key,
            move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(User::new(999))
                }
            },
            None,
        )
        .await
        .expect("get_or_set");
    assert_eq!(second, User::new(3), "second call should read the cached value, not recompute");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn health_check_passes_with_both_tiers_reachable() {
    let cache = setup_cache().await.expect("cache");
    assert!(cache.health_check().await);
}

fn describe<T>(result: &GetResult<T>) -> &'static str {
    match result {
        GetResult::Fresh(_) => "Fresh",
        GetResult::Stale { .. } => "Stale",
        GetResult::Miss => "Miss",
    }
}
