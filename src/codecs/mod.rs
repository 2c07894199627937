//! Pluggable value serialization: `CacheCodec` lets a user swap `serde_json` for a
//! binary codec without touching store or orchestrator code.

pub mod json;
#[cfg(feature = "bincode")]
pub mod bincode_codec;
#[cfg(feature = "msgpack")]
pub mod msgpack_codec;

pub use json::JsonCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

pub trait CacheCodec: Send + Sync + Debug {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<Vec<u8>>;
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> anyhow::Result<T>;
    fn name(&self) -> &'static str;
}
