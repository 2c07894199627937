//! Integration tests for L1/L2 tier interaction: L2 hits promote into L1, and
//! an L1-only store still answers reads once warmed.

mod common;

use cachify::{GetResult, Store};
use common::{test_data::User, test_key};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn l2_hit_promotes_value_into_l1() {
    unsafe { std::env::set_var("REDIS_URL", common::redis_url()); }

    let l1: Arc<dyn Store> = Arc::new(cachify::store::moka_store::MemoryStore::new());
    let l2: Arc<dyn Store> = Arc::new(cachify::store::redis_store::DistributedStore::new().await.expect("redis"));
    let cache = cachify::Cachify::builder().with_l1(Arc::clone(&l1)).with_l2(Arc::clone(&l2)).build().await.expect("cache");

    let key = test_key("promote");
    let user = User::new(5);
    cache.set(&key, &user, None).await.expect("set");

    // Evict from L1 directly, leaving only the L2 copy.
    l1.remove(&key).await.expect("l1 remove");
    assert!(l1.get(&key).await.is_none());

    match cache.get::<User>(&key).await.expect("get") {
        GetResult::Fresh(v) => assert_eq!(v, user),
        other => panic!("expected a fresh hit from L2, got a different result: {other:?}"),
    }

    // The read-through should have promoted the value back into L1.
    assert!(l1.get(&key).await.is_some(), "L2 hit should refill L1");
}

#[tokio::test]
async fn both_tiers_backed_by_the_same_store_still_round_trips() {
    unsafe { std::env::set_var("REDIS_URL", common::redis_url()); }

    let store: Arc<dyn Store> = Arc::new(cachify::store::moka_store::MemoryStore::new());
    let cache = cachify::Cachify::builder().with_l1(Arc::clone(&store)).with_l2(store).build().await.expect("cache");

    let key = test_key("same-store");
    let user = User::new(6);
    cache.set(&key, &user, None).await.expect("set");

    match cache.get::<User>(&key).await.expect("get") {
        GetResult::Fresh(v) => assert_eq!(v, user),
        other => panic!("expected a fresh hit, got a different result: {other:?}"),
    }
}

#[tokio::test]
async fn jitter_does_not_change_which_tier_answers_a_fresh_read() {
    use cachify::{CachifyConfig, EntryOptions};

    unsafe { std::env::set_var("REDIS_URL", common::redis_url()); }
    let mut config = CachifyConfig::default();
    config.jitter_ratio = 0.1;
    let cache = cachify::Cachify::builder().with_config(config).build().await.expect("cache");

    let key = test_key("jittered");
    let user = User::new(8);
    let opts = EntryOptions { ttl: Some(Duration::from_secs(30)), ..Default::default() };
    cache.set(&key, &user, Some(opts)).await.expect("set");

    assert!(matches!(cache.get::<User>(&key).await.expect("get"), GetResult::Fresh(_)));
}
