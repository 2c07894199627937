//! Bounded request-body hashing and response buffering. Buffers fully-read `Bytes`
//! (the orchestrator's own store layer is byte-oriented already) rather than streaming
//! chunk-by-chunk through a custom `http_body::Body` impl, since the workflow needs the
//! whole body in hand before it can hash or cache it regardless.

use sha2::{Digest, Sha256};

/// Outcome of hashing a request body under a size cap.
pub enum BodyHash {
    Hash(String),
    /// The body exceeded `max_size`; caching is aborted for this request.
    TooLarge,
}

/// Hash `body` with SHA-256 if it fits within `max_size`.
pub fn hash_request_body(body: &[u8], max_size: usize) -> BodyHash {
    if body.len() > max_size {
        return BodyHash::TooLarge;
    }
    let digest = Sha256::digest(body);
    BodyHash::Hash(format!("{digest:x}"))
}

/// Accumulates response bytes up to a cap, discarding and flagging overflow past it.
pub struct ResponseBuffer {
    max_size: usize,
    buffer: Vec<u8>,
    overflowed: bool,
}

impl ResponseBuffer {
    pub fn new(max_size: usize) -> Self {
        Self { max_size, buffer: Vec::new(), overflowed: false }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.overflowed {
            return;
        }
        if self.buffer.len() + chunk.len() > self.max_size {
            self.buffer.clear();
            self.overflowed = true;
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Take the accumulated bytes, or `None` if the buffer overflowed.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        if self.overflowed {
            None
        } else {
            Some(self.buffer)
        }
    }
}
