use super::{EncodingError, Value};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Vec<u8> {
    // Only fails for types serde cannot represent, never for our records
    bincode::serialize(value).expect("serialization should not fail")
}

/// Deserialize a value from a byte slice using bincode
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| EncodingError::InvalidFormat(format!("Deserialization failed: {}", e)).into())
}

impl<T> Value for T
where
    T: Serialize + for<'a> Deserialize<'a>,
{
    fn encode(&self) -> Vec<u8> {
        serialize(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        deserialize(bytes)
    }
}
