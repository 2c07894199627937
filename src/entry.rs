//! Entry metadata and the fresh/stale/miss state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sibling metadata record stored at `<key>:meta`. Invariant: `created_at <=
/// logical_expiration <= fail_safe_until`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub logical_expiration: DateTime<Utc>,
    pub fail_safe_until: DateTime<Utc>,
}

impl EntryMetadata {
    /// Build metadata for a value written now with the given logical TTL and fail-safe
    /// extension.
    pub fn new(now: DateTime<Utc>, ttl: chrono::Duration, fail_safe_max_duration: chrono::Duration) -> Self {
        let logical_expiration = now + ttl;
        let fail_safe_until = logical_expiration + fail_safe_max_duration;
        Self {
            created_at: now,
            logical_expiration,
            fail_safe_until,
        }
    }

    /// Total TTL to hand the underlying store: `ttl + fail_safe_max_duration`, so the payload
    /// physically outlives its logical expiration.
    pub fn storage_ttl(&self) -> chrono::Duration {
        self.fail_safe_until - self.created_at
    }

    pub fn state(&self, now: DateTime<Utc>) -> EntryState {
        if now <= self.logical_expiration {
            EntryState::Fresh
        } else if now <= self.fail_safe_until {
            EntryState::Stale
        } else {
            EntryState::Miss
        }
    }
}

/// Derived lifecycle state of an entry at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Fresh,
    Stale,
    Miss,
}

/// A value read back from a store, together with the layer it came from and its derived
/// freshness. `metadata` is `None` when the payload was present but its metadata sibling
/// was missing — treated as `Fresh` for backward compatibility.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    pub value: T,
    pub metadata: Option<EntryMetadata>,
    pub state: EntryState,
}

impl<T> CachedValue<T> {
    pub fn new(value: T, metadata: Option<EntryMetadata>, now: DateTime<Utc>) -> Self {
        let state = metadata.map_or(EntryState::Fresh, |m| m.state(now));
        Self { value, metadata, state }
    }

    pub fn is_fresh(&self) -> bool {
        self.state == EntryState::Fresh
    }

    pub fn is_stale(&self) -> bool {
        self.state == EntryState::Stale
    }
}
