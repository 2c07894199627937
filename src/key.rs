//! Cache key formatting. A cache key is an opaque UTF-8 string; equality is byte-exact.
//! This module only owns the `prefix:region:key` join and the metadata-key suffix
//! convention (`K + ":meta"`) — everything else treats keys as plain `String`s,
//! taken by reference wherever a backend needs one.

/// Suffix appended to a user key to address its sibling metadata entry. Callers must not
/// use this suffix for their own keys.
pub const META_SUFFIX: &str = ":meta";

/// Build the effective cache key from an optional global prefix, an optional per-entry
/// region, and the caller's key.
pub fn build_key(prefix: Option<&str>, region: Option<&str>, key: &str) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(p) = prefix {
        if !p.is_empty() {
            parts.push(p);
        }
    }
    if let Some(r) = region {
        if !r.is_empty() {
            parts.push(r);
        }
    }
    parts.push(key);
    parts.join(":")
}

/// The metadata key for a given effective cache key.
pub fn meta_key(key: &str) -> String {
    format!("{key}{META_SUFFIX}")
}
