//! Similarity-based request fingerprinting. The index and signer are pure, synchronous
//! data structures; this module wires them together into an engine the request-cache
//! workflow (`crate::request_cache`) consults instead of hashing the request verbatim.
//! Configuration follows this crate's usual "plain struct + `Default` impl" convention.

pub mod index;
pub mod simhash;

use chrono::{DateTime, Utc};
use index::{IndexEntry, SimilarityIndex};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration as StdDuration;

/// A gate on whether similarity probing is worth its cost for a given request. Any one
/// predicate being true is enough to permit probing; an empty list is vacuously true
/// (no cost gate configured, probe unconditionally).
#[derive(Debug, Clone, PartialEq)]
pub enum CostPredicate {
    /// The request body is at least this many bytes.
    MinBodySize(usize),
    /// The given header is present on the request, regardless of its value.
    HeaderPresent(String),
}

/// Configuration for the similarity subsystem.
#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    pub enabled: bool,
    pub min_similarity: f64,
    pub max_entry_age: StdDuration,
    pub max_index_entries: usize,
    pub max_candidates: usize,
    pub max_canonical_length: usize,
    pub max_tokens: usize,
    pub ignored_json_fields: HashSet<String>,
    pub required_headers: Vec<String>,
    pub only_if_costly: Vec<CostPredicate>,
    pub use_embedding_scorer: bool,
    pub max_embedding_length: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_similarity: 0.95,
            max_entry_age: StdDuration::from_secs(10 * 60),
            max_index_entries: 1024,
            max_candidates: 64,
            max_canonical_length: 16 * 1024,
            max_tokens: 512,
            ignored_json_fields: ["id", "timestamp", "created_at", "updated_at"].into_iter().map(String::from).collect(),
            required_headers: Vec::new(),
            only_if_costly: Vec::new(),
            use_embedding_scorer: false,
            max_embedding_length: 512,
        }
    }
}

/// Gate §4.5 step 2: probing requires the subsystem to be `enabled`, at least one
/// `only_if_costly` predicate to hold (vacuously true if none are configured), and every
/// header in `required_headers` to be present on the request.
pub fn similarity_permitted(config: &SimilarityConfig, headers: &http::HeaderMap, body_len: usize) -> bool {
    if !config.enabled {
        return false;
    }
    let costly = config.only_if_costly.is_empty()
        || config.only_if_costly.iter().any(|predicate| match predicate {
            CostPredicate::MinBodySize(min) => body_len >= *min,
            CostPredicate::HeaderPresent(name) => headers.contains_key(name.as_str()),
        });
    if !costly {
        return false;
    }
    config.required_headers.iter().all(|name| headers.contains_key(name.as_str()))
}

/// Canonicalize a request payload for fingerprinting. `content_type` decides the
/// strategy: JSON content types are structurally normalized; everything else is
/// lowercased and whitespace-collapsed. Returns `None` on malformed JSON, which aborts
/// similarity mode for that request per spec.
pub fn canonicalize(content_type: &str, body: &str, ignored_fields: &HashSet<String>) -> Option<String> {
    if content_type.contains("json") {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let mut out = String::new();
        canonicalize_json(&value, ignored_fields, &mut out);
        Some(out)
    } else {
        let mut out = String::new();
        let mut last_was_space = false;
        for ch in body.chars().flat_map(char::to_lowercase) {
            if ch.is_whitespace() {
                if !last_was_space && !out.is_empty() {
                    out.push(' ');
                }
                last_was_space = true;
            } else {
                out.push(ch);
                last_was_space = false;
            }
        }
        Some(out.trim().to_string())
    }
}

fn canonicalize_json(value: &serde_json::Value, ignored_fields: &HashSet<String>, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().filter(|k| !ignored_fields.contains(k.as_str())).collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                #[allow(clippy::indexing_slicing)]
                canonicalize_json(&map[*key], ignored_fields, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize_json(item, ignored_fields, out);
            }
            out.push(']');
        }
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Null => out.push_str("null"),
    }
}

/// An optional pluggable embedding-based scorer, used in place of Hamming-distance
/// scoring when both sides carry an embedding.
pub trait EmbeddingScorer: Send + Sync {
    fn score(&self, a: &[f32], b: &[f32]) -> f64;
}

/// Outcome of a similarity probe.
pub struct SimilarityHit {
    pub cache_key: String,
    pub score: f64,
}

/// The process-scoped similarity engine: one coarse lock around the index.
pub struct SimilarityEngine {
    config: SimilarityConfig,
    index: Mutex<SimilarityIndex>,
    embedding_scorer: Option<Box<dyn EmbeddingScorer>>,
}

impl SimilarityEngine {
    pub fn new(config: SimilarityConfig) -> Self {
        let index = Mutex::new(SimilarityIndex::new(config.max_index_entries));
        Self { config, index, embedding_scorer: None }
    }

    pub fn with_embedding_scorer(mut self, scorer: Box<dyn EmbeddingScorer>) -> Self {
        self.embedding_scorer = Some(scorer);
        self
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Sign a canonical payload using this engine's `max_tokens` bound.
    pub fn sign(&self, canonical: &str) -> simhash::Signature {
        simhash::sign(canonical, self.config.max_tokens)
    }

    /// Look up the best similarity candidate for `signature`, dropping stale candidates as a
    /// side effect.
    pub fn probe(&self, signature: u64, embedding: Option<&[f32]>, now: DateTime<Utc>) -> Option<SimilarityHit> {
        let max_age = chrono::Duration::from_std(self.config.max_entry_age).unwrap_or(chrono::Duration::zero());
        let mut index = self.index.lock();
        index.evict_older_than(now, max_age);

        let candidate_keys = index.candidates(signature, self.config.max_candidates);
        let mut best: Option<(String, f64)> = None;

        for key in candidate_keys {
            let Some(entry) = index.get(&key) else { continue };
            let candidate_score = match (embedding, entry.embedding.as_deref(), self.embedding_scorer.as_deref()) {
                (Some(query_embedding), Some(candidate_embedding), Some(scorer)) if self.config.use_embedding_scorer => {
                    scorer.score(query_embedding, candidate_embedding)
                }
                _ => simhash::score(signature, entry.signature),
            };
            if best.as_ref().is_none_or(|(_, best_score)| candidate_score > *best_score) {
                best = Some((key, candidate_score));
            }
        }

        crate::metrics::record_similarity_candidates(index.len());
        match best {
            Some((cache_key, score)) => {
                crate::metrics::record_similarity_best_score(score);
                tracing::debug!(mode = "similarity", best_score = score, "similarity probe found a candidate");
                Some(SimilarityHit { cache_key, score })
            }
            None => {
                tracing::debug!(mode = "similarity", "similarity probe found no candidates");
                None
            }
        }
    }

    /// Remove the index entry for `cache_key`.
    pub fn evict(&self, cache_key: &str) {
        self.index.lock().remove(cache_key);
    }

    /// Record a new response in the similarity index.
    pub fn record(
        &self,
        cache_key: String,
        signature: u64,
        token_count: usize,
        embedding: Option<Vec<f32>>,
        now: DateTime<Utc>,
    ) {
        self.index.lock().insert(IndexEntry { cache_key, signature, token_count, hash_prefix: signature, cached_at: now, embedding });
    }

    pub fn entry_count(&self) -> usize {
        self.index.lock().len()
    }
}
