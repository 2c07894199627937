//! Default codec: plain `serde_json` serialization.

use super::CacheCodec;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_struct() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Point { x: i32, y: i32 }

        let codec = JsonCodec;
        let bytes = codec.serialize(&Point { x: 1, y: 2 }).unwrap();
        let back: Point = codec.deserialize(&bytes).unwrap();
        assert_eq!(back, Point { x: 1, y: 2 });
    }
}
