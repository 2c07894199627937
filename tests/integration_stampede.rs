//! Integration tests for stampede protection.
//!
//! Tests concurrent access patterns and request coalescing against real
//! Moka + Redis tiers (unlike the in-process unit tests in
//! `src/orchestrator.rs`, which exercise the same invariant against an
//! in-memory-only pair of stores).

mod common;

use common::{setup_cache, test_data::User, test_key};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn concurrent_misses_on_the_same_key_run_the_factory_once() {
    let cache = Arc::new(setup_cache().await.expect("cache"));
    let key = test_key("stampede");
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_set(
                    &key,
                    move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                            Ok(User::new(42))
                        }
                    },
                    None,
                )
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.expect("task").expect("get_or_set"), User::new(42));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one caller should have run the factory");
}

#[tokio::test]
async fn distinct_keys_do_not_coalesce() {
    let cache = Arc::new(setup_cache().await.expect("cache"));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..4u64 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let key = test_key(&format!("distinct-{i}"));
        handles.push(tokio::spawn(async move {
            cache
                .get_or_set(
                    &key,
                    move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(User::new(i))
                        }
                    },
                    None,
                )
                .await
        }));
    }

    for handle in handles {
        handle.await.expect("task").expect("get_or_set");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4, "each distinct key should run its own factory");
}
