//! Optional binary codec (feature `bincode`), for callers who'd rather pay bincode's
//! encoding cost than JSON's text overhead, since `CacheCodec` is meant to be pluggable.

use super::CacheCodec;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl CacheCodec for BincodeCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> anyhow::Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}
