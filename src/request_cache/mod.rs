//! Request-cache HTTP workflow: policy resolution, eligibility, key derivation, and the
//! stored response shape. [`layer`] wires these pure functions into a Tower
//! [`tower::Layer`]/[`tower::Service`] pair.

pub mod body;
pub mod layer;

use http::{HeaderMap, Method, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Whether the workflow fingerprints requests exactly or by similarity ( "Policy
/// resolution" — `mode (Exact|Similarity)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Exact,
    Similarity,
}

/// Headers stripped before storing a response.
pub const HEADER_DENYLIST: &[&str] =
    &["connection", "content-length", "date", "keep-alive", "server", "transfer-encoding"];

const CACHE_STATUS_HEADER: &str = "x-cachify-cache";
const CACHE_STALE_HEADER: &str = "x-cachify-cache-stale";
const CACHE_SIMILARITY_HEADER: &str = "x-cachify-cache-similarity";
const CACHE_KEY_HEADER: &str = "x-cachify-cache-key";
const KEY_PREFIX: &str = "http:req:";
pub const SIMILARITY_KEY_PREFIX: &str = "http:req:sim:";

/// Resolved policy for one request. Built by merging [`RequestCacheConfig`] with an
/// optional per-endpoint override; the merge itself is a plain struct-update left to the
/// integrating application, since endpoint metadata is routing-framework specific.
#[derive(Debug, Clone)]
pub struct RequestCachePolicy {
    pub mode: CacheMode,
    pub duration: Duration,
    pub cacheable_methods: BTreeSet<Method>,
    pub cacheable_status_codes: BTreeSet<StatusCode>,
    pub allowed_request_content_types: Vec<String>,
    pub allowed_response_content_types: Vec<String>,
    pub included_paths: Vec<String>,
    pub excluded_paths: Vec<String>,
    pub vary_by_headers: Vec<String>,
    pub include_body: bool,
    pub max_request_body_size_bytes: usize,
    pub max_response_body_size_bytes: usize,
    pub cache_authenticated_responses: bool,
    pub respect_request_cache_control: bool,
    pub respect_response_cache_control: bool,
    pub allow_set_cookie_responses: bool,
    pub lowercase_path: bool,
    pub include_cache_key_header: bool,
}

/// Global request-cache configuration.
#[derive(Debug, Clone)]
pub struct RequestCacheConfig {
    pub enabled: bool,
    pub default_policy: RequestCachePolicy,
}

impl Default for RequestCachePolicy {
    fn default() -> Self {
        Self {
            mode: CacheMode::Exact,
            duration: Duration::from_secs(60),
            cacheable_methods: [Method::GET].into_iter().collect(),
            cacheable_status_codes: [StatusCode::OK].into_iter().collect(),
            allowed_request_content_types: Vec::new(),
            allowed_response_content_types: Vec::new(),
            included_paths: Vec::new(),
            excluded_paths: Vec::new(),
            vary_by_headers: Vec::new(),
            include_body: false,
            max_request_body_size_bytes: 64 * 1024,
            max_response_body_size_bytes: 1024 * 1024,
            cache_authenticated_responses: false,
            respect_request_cache_control: true,
            respect_response_cache_control: true,
            allow_set_cookie_responses: false,
            lowercase_path: false,
            include_cache_key_header: false,
        }
    }
}

impl Default for RequestCacheConfig {
    fn default() -> Self {
        Self { enabled: false, default_policy: RequestCachePolicy::default() }
    }
}

/// A stored response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, Vec<String>>,
    pub content_type: Option<String>,
    pub cached_at: chrono::DateTime<chrono::Utc>,
    pub duration_secs: u64,
}

impl CachedResponse {
    pub fn is_stale(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now > self.cached_at + chrono::Duration::seconds(self.duration_secs as i64)
    }
}

/// Evaluate the eligibility pipeline for an incoming request. Returns `true` when the
/// request should be considered for caching.
pub fn is_request_eligible(policy: &RequestCachePolicy, method: &Method, path: &str, headers: &HeaderMap) -> bool {
    if !policy.cacheable_methods.contains(method) {
        return false;
    }
    if !policy.included_paths.is_empty() && !policy.included_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return false;
    }
    if policy.excluded_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return false;
    }
    if !policy.allowed_request_content_types.is_empty() {
        let content_type = headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
        if !content_type.is_empty() && !policy.allowed_request_content_types.iter().any(|ct| content_type.starts_with(ct.as_str())) {
            return false;
        }
    }
    if !policy.cache_authenticated_responses && headers.contains_key(http::header::AUTHORIZATION) {
        return false;
    }
    if policy.respect_request_cache_control {
        if let Some(cc) = headers.get(http::header::CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
            let cc = cc.to_ascii_lowercase();
            if cc.contains("no-store") || cc.contains("no-cache") || cc.contains("private") {
                return false;
            }
        }
    }
    true
}

/// Is this response eligible for storage?
pub fn is_response_cacheable(policy: &RequestCachePolicy, status: StatusCode, headers: &HeaderMap) -> bool {
    if !policy.cacheable_status_codes.contains(&status) {
        return false;
    }
    if !policy.allow_set_cookie_responses && headers.contains_key(http::header::SET_COOKIE) {
        return false;
    }
    if !policy.allowed_response_content_types.is_empty() {
        let content_type = headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
        if !content_type.is_empty() && !policy.allowed_response_content_types.iter().any(|ct| content_type.starts_with(ct.as_str())) {
            return false;
        }
    }
    if policy.respect_response_cache_control {
        if let Some(cc) = headers.get(http::header::CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
            let cc = cc.to_ascii_lowercase();
            if cc.contains("no-store") || cc.contains("private") {
                return false;
            }
        }
    }
    true
}

/// Strip denylisted headers before storage.
pub fn strip_denylisted_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if HEADER_DENYLIST.contains(&lower.as_str()) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            out.entry(lower).or_default().push(v.to_string());
        }
    }
    out
}

/// Build the `[method, path, query, vary]` prefix shared by exact- and similarity-mode
/// key derivation.
fn key_parts(policy: &RequestCachePolicy, method: &Method, path: &str, query_pairs: &[(String, String)], headers: &HeaderMap) -> Vec<String> {
    let mut parts = Vec::new();
    parts.push(method.as_str().to_string());
    parts.push(if policy.lowercase_path { path.to_ascii_lowercase() } else { path.to_string() });

    let mut sorted_query = query_pairs.to_vec();
    sorted_query.sort();
    let query_part = sorted_query.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
    parts.push(query_part);

    let mut vary_values = Vec::new();
    for header_name in &policy.vary_by_headers {
        let lower = header_name.to_ascii_lowercase();
        let mut values: Vec<String> = headers
            .get_all(lower.as_str())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .collect();
        values.sort();
        vary_values.push(format!("{lower}={}", values.join(",")));
    }
    vary_values.sort();
    parts.push(vary_values.join(";"));

    parts
}

/// Derive the exact-mode cache key ( "Key derivation (exact mode)").
pub fn derive_exact_key(
    policy: &RequestCachePolicy,
    method: &Method,
    path: &str,
    query_pairs: &[(String, String)],
    headers: &HeaderMap,
    body_hash: Option<&str>,
) -> String {
    let mut parts = key_parts(policy, method, path, query_pairs, headers);
    if let Some(hash) = body_hash {
        parts.push(hash.to_string());
    }

    let canonical = parts.join("|");
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{KEY_PREFIX}{:x}", digest)
}

/// Derive the similarity-mode index/response key: same `[method, path, query, vary]`
/// prefix as [`derive_exact_key`], but keyed on the canonicalized body itself rather than
/// a hash of the raw bytes, so byte-identical canonical payloads always collide on the
/// same exact-probe key regardless of request formatting.
pub fn derive_similarity_key(
    policy: &RequestCachePolicy,
    method: &Method,
    path: &str,
    query_pairs: &[(String, String)],
    headers: &HeaderMap,
    canonical_body: &str,
) -> String {
    let mut parts = key_parts(policy, method, path, query_pairs, headers);
    parts.push(canonical_body.to_string());

    let canonical = parts.join("|");
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{SIMILARITY_KEY_PREFIX}{:x}", digest)
}

/// Header names emitted on every response the workflow handles.
pub struct ResponseMetadataHeaders {
    pub cache: &'static str,
    pub stale: bool,
    pub similarity: Option<f64>,
    pub cache_key: Option<String>,
}

impl ResponseMetadataHeaders {
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(
            http::HeaderName::from_static(CACHE_STATUS_HEADER),
            http::HeaderValue::from_static(self.cache),
        );
        headers.insert(
            http::HeaderName::from_static(CACHE_STALE_HEADER),
            http::HeaderValue::from_static(if self.stale { "true" } else { "false" }),
        );
        if let Some(score) = self.similarity {
            if let Ok(value) = http::HeaderValue::from_str(&format!("{score:.3}")) {
                headers.insert(http::HeaderName::from_static(CACHE_SIMILARITY_HEADER), value);
            }
        }
        if let Some(key) = &self.cache_key {
            if let Ok(value) = http::HeaderValue::from_str(key) {
                headers.insert(http::HeaderName::from_static(CACHE_KEY_HEADER), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_caches_only_get_200() {
        let policy = RequestCachePolicy::default();
        assert!(policy.cacheable_methods.contains(&Method::GET));
        assert!(policy.cacheable_status_codes.contains(&StatusCode::OK));
    }

    #[test]
    fn method_not_cacheable_is_ineligible() {
        let policy = RequestCachePolicy::default();
        let headers = HeaderMap::new();
        assert!(!is_request_eligible(&policy, &Method::POST, "/x", &headers));
    }

    #[test]
    fn no_store_cache_control_is_ineligible() {
        let policy = RequestCachePolicy::default();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CACHE_CONTROL, http::HeaderValue::from_static("no-store"));
        assert!(!is_request_eligible(&policy, &Method::GET, "/x", &headers));
    }

    #[test]
    fn excluded_path_wins_over_included_path() {
        let mut policy = RequestCachePolicy::default();
        policy.included_paths = vec!["/api".into()];
        policy.excluded_paths = vec!["/api/admin".into()];
        let headers = HeaderMap::new();
        assert!(!is_request_eligible(&policy, &Method::GET, "/api/admin/x", &headers));
        assert!(is_request_eligible(&policy, &Method::GET, "/api/x", &headers));
    }

    #[test]
    fn key_derivation_is_order_independent_in_query_pairs() {
        let policy = RequestCachePolicy::default();
        let headers = HeaderMap::new();
        let k1 = derive_exact_key(&policy, &Method::GET, "/x", &[("b".into(), "2".into()), ("a".into(), "1".into())], &headers, None);
        let k2 = derive_exact_key(&policy, &Method::GET, "/x", &[("a".into(), "1".into()), ("b".into(), "2".into())], &headers, None);
        assert_eq!(k1, k2);
        assert!(k1.starts_with(KEY_PREFIX));
    }

    #[test]
    fn similarity_key_is_keyed_on_the_canonical_body() {
        let policy = RequestCachePolicy::default();
        let headers = HeaderMap::new();
        let k1 = derive_similarity_key(&policy, &Method::POST, "/x", &[], &headers, "{a:1}");
        let k2 = derive_similarity_key(&policy, &Method::POST, "/x", &[], &headers, "{a:1}");
        let k3 = derive_similarity_key(&policy, &Method::POST, "/x", &[], &headers, "{a:2}");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert!(k1.starts_with(SIMILARITY_KEY_PREFIX));
    }

    #[test]
    fn denylisted_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::DATE, http::HeaderValue::from_static("now"));
        headers.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
        let stripped = strip_denylisted_headers(&headers);
        assert!(!stripped.contains_key("date"));
        assert!(stripped.contains_key("content-type"));
    }

    #[test]
    fn response_with_set_cookie_is_not_cacheable_by_default() {
        let policy = RequestCachePolicy::default();
        let mut headers = HeaderMap::new();
        headers.insert(http::header::SET_COOKIE, http::HeaderValue::from_static("a=b"));
        assert!(!is_response_cacheable(&policy, StatusCode::OK, &headers));
    }
}
