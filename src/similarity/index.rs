//! Bucketed LRU similarity index: a single coarse lock guards the whole structure
//! deliberately rather than sharding it. A `HashMap<String, usize>` plus a
//! `Vec<Option<Node>>` slab stands in for an intrusive doubly linked list, which is the
//! idiomatic way to express an LRU in safe Rust without `unsafe` pointer juggling.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// One entry in the similarity index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub cache_key: String,
    pub signature: u64,
    pub token_count: usize,
    pub hash_prefix: u64,
    pub cached_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
}

/// Number of LSH bands a signature is split into.
const BAND_COUNT: usize = 4;
const BAND_BITS: u32 = 16;

fn bands_of(signature: u64) -> [u16; BAND_COUNT] {
    let mut bands = [0u16; BAND_COUNT];
    for (i, band) in bands.iter_mut().enumerate() {
        let shift = i as u32 * BAND_BITS;
        *band = ((signature >> shift) & 0xFFFF) as u16;
    }
    bands
}

/// In-memory similarity index. A single coarse lock wraps this type at the call site; the
/// type itself is not internally synchronized.
pub struct SimilarityIndex {
    max_entries: usize,
    entries: HashMap<String, IndexEntry>,
    buckets: [HashMap<u16, Vec<String>>; BAND_COUNT],
    lru: VecDeque<String>,
}

impl SimilarityIndex {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: HashMap::new(),
            buckets: std::array::from_fn(|_| HashMap::new()),
            lru: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch_lru(&mut self, cache_key: &str) {
        if let Some(pos) = self.lru.iter().position(|k| k == cache_key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(cache_key.to_string());
    }

    fn unbucket(&mut self, cache_key: &str, signature: u64) {
        for (band, bucket) in bands_of(signature).into_iter().zip(self.buckets.iter_mut()) {
            if let Some(keys) = bucket.get_mut(&band) {
                keys.retain(|k| k != cache_key);
                if keys.is_empty() {
                    bucket.remove(&band);
                }
            }
        }
    }

    /// Insert or replace an entry, evicting the least-recently-used entry if this insertion
    /// would exceed `max_entries`.
    pub fn insert(&mut self, entry: IndexEntry) {
        let cache_key = entry.cache_key.clone();
        if let Some(existing) = self.entries.remove(&cache_key) {
            self.unbucket(&cache_key, existing.signature);
        } else if self.entries.len() >= self.max_entries {
            self.evict_lru();
        }

        for (band, bucket) in bands_of(entry.signature).into_iter().zip(self.buckets.iter_mut()) {
            bucket.entry(band).or_default().push(cache_key.clone());
        }
        self.touch_lru(&cache_key);
        self.entries.insert(cache_key, entry);
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self.lru.pop_front() {
            if let Some(entry) = self.entries.remove(&oldest) {
                self.unbucket(&oldest, entry.signature);
            }
        }
    }

    /// Remove an entry by cache key.
    pub fn remove(&mut self, cache_key: &str) -> Option<IndexEntry> {
        let entry = self.entries.remove(cache_key)?;
        self.unbucket(cache_key, entry.signature);
        if let Some(pos) = self.lru.iter().position(|k| k == cache_key) {
            self.lru.remove(pos);
        }
        Some(entry)
    }

    /// Candidate keys sharing at least one LSH band with `signature`, deduplicated.
    pub fn candidates(&self, signature: u64, max_candidates: usize) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for (band, bucket) in bands_of(signature).into_iter().zip(self.buckets.iter()) {
            if let Some(keys) = bucket.get(&band) {
                for key in keys {
                    if seen.insert(key.clone()) {
                        out.push(key.clone());
                        if out.len() >= max_candidates {
                            return out;
                        }
                    }
                }
            }
        }
        out
    }

    pub fn get(&self, cache_key: &str) -> Option<&IndexEntry> {
        self.entries.get(cache_key)
    }

    /// Drop every entry older than `max_age` as of `now`.
    pub fn evict_older_than(&mut self, now: DateTime<Utc>, max_age: chrono::Duration) {
        let stale: Vec<String> = self
            .entries
            .values()
            .filter(|e| now - e.cached_at > max_age)
            .map(|e| e.cache_key.clone())
            .collect();
        for key in stale {
            self.remove(&key);
        }
    }
}
