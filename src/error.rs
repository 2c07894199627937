//! Error kinds and stale/timeout annotations.
//!
//! `CachifyError` covers the error *kinds* named in the design (§7): most of them
//! are never surfaced to callers — they are logged and swallowed, or attached to a
//! tracing span as an annotation. Only `HardTimeout` and `FactoryFailure` reach the
//! caller, and only when no stale fallback was available.

use std::fmt;
use thiserror::Error;

/// Why a value returned to a caller was stale rather than fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Expired,
    L2Failure,
    FactoryFailure,
    SoftTimeout,
    HardTimeout,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StaleReason::Expired => "Expired",
            StaleReason::L2Failure => "L2Failure",
            StaleReason::FactoryFailure => "FactoryFailure",
            StaleReason::SoftTimeout => "SoftTimeout",
            StaleReason::HardTimeout => "HardTimeout",
        };
        f.write_str(s)
    }
}

/// Which refresh deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutType {
    Soft,
    Hard,
}

/// Public error type for orchestrator and request-cache operations.
#[derive(Debug, Error)]
pub enum CachifyError {
    /// The factory's hard timeout elapsed and no stale value was available to fall
    /// back on.
    #[error("factory hard timeout elapsed with no stale fallback available")]
    HardTimeout,

    /// The user-supplied factory returned an error and no stale value was available.
    #[error("factory failed: {0}")]
    FactoryFailure(#[source] anyhow::Error),

    /// A store or codec failed to serialize/deserialize a value. Logged and
    /// swallowed by default at the orchestrator boundary; surfaced here only when
    /// explicitly propagated by a caller that opted out of that default.
    #[error("serialization failure: {0}")]
    SerializationFailure(#[source] anyhow::Error),

    /// L2 store failed and `fail_fast_on_l2_errors` is set with no stale candidate.
    #[error("distributed store error: {0}")]
    DistributedStore(#[source] anyhow::Error),

    /// Backplane delivery failed. Logged and swallowed by default; the primary
    /// operation always succeeds regardless of this error.
    #[error("backplane delivery failure: {0}")]
    BackplaneDeliveryFailure(#[source] anyhow::Error),

    /// A backplane envelope had a `v` field other than the version this build
    /// speaks. The message is dropped silently at the subscriber; this variant
    /// exists for the rare caller that parses envelopes directly.
    #[error("backplane wire version mismatch: expected {expected}, got {actual}")]
    WireVersionMismatch { expected: u32, actual: u32 },

    /// Request or response body exceeded its configured cap. Caching is disabled
    /// for that request; the request itself is never failed because of this.
    #[error("body exceeded configured size cap")]
    BodyTooLarge,

    /// Canonicalization of a request payload failed (e.g. malformed JSON) under
    /// similarity mode. Similarity caching is disabled for that request only.
    #[error("canonicalization failure: {0}")]
    CanonicalizationFailure(#[source] anyhow::Error),
}
