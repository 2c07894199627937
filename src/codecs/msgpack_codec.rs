//! Optional MessagePack codec (feature `msgpack`), backed by `rmp-serde`.

use super::CacheCodec;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl CacheCodec for MsgpackCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> anyhow::Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}
