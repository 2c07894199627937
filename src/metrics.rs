//! Centralized metric names so they are defined exactly once and recorded through the
//! `metrics` crate's global recorder, rather than scattered ad hoc `AtomicU64` fields.

use metrics::{counter, histogram};

pub const CACHE_HIT_TOTAL: &str = "cache_hit_total";
pub const CACHE_MISS_TOTAL: &str = "cache_miss_total";
pub const CACHE_SET_TOTAL: &str = "cache_set_total";
pub const CACHE_REMOVE_TOTAL: &str = "cache_remove_total";
pub const STALE_SERVED_COUNT: &str = "stale_served_count";
pub const FACTORY_TIMEOUT_SOFT_COUNT: &str = "factory_timeout_soft_count";
pub const FACTORY_TIMEOUT_HARD_COUNT: &str = "factory_timeout_hard_count";
pub const FAILSAFE_USED_COUNT: &str = "failsafe_used_count";
pub const CACHE_GET_DURATION_MS: &str = "cache_get_duration_ms";

pub const SIMILARITY_CACHE_HIT: &str = "similarity_cache_hit";
pub const SIMILARITY_CACHE_MISS: &str = "similarity_cache_miss";
pub const SIMILARITY_CANDIDATES_COUNT: &str = "similarity_candidates_count";
pub const SIMILARITY_BEST_SCORE_HISTOGRAM: &str = "similarity_best_score_histogram";

pub fn record_hit(layer: &'static str) {
    counter!(CACHE_HIT_TOTAL, "layer" => layer).increment(1);
}

pub fn record_miss() {
    counter!(CACHE_MISS_TOTAL).increment(1);
}

pub fn record_set() {
    counter!(CACHE_SET_TOTAL).increment(1);
}

pub fn record_remove() {
    counter!(CACHE_REMOVE_TOTAL).increment(1);
}

pub fn record_stale_served() {
    counter!(STALE_SERVED_COUNT).increment(1);
}

pub fn record_soft_timeout() {
    counter!(FACTORY_TIMEOUT_SOFT_COUNT).increment(1);
}

pub fn record_hard_timeout() {
    counter!(FACTORY_TIMEOUT_HARD_COUNT).increment(1);
}

pub fn record_failsafe_used() {
    counter!(FAILSAFE_USED_COUNT).increment(1);
}

pub fn record_get_duration_ms(ms: f64) {
    histogram!(CACHE_GET_DURATION_MS).record(ms);
}

pub fn record_similarity_hit() {
    counter!(SIMILARITY_CACHE_HIT).increment(1);
}

pub fn record_similarity_miss() {
    counter!(SIMILARITY_CACHE_MISS).increment(1);
}

pub fn record_similarity_candidates(count: usize) {
    counter!(SIMILARITY_CANDIDATES_COUNT).increment(count as u64);
}

pub fn record_similarity_best_score(score: f64) {
    histogram!(SIMILARITY_BEST_SCORE_HISTOGRAM).record(score);
}
