pub mod bincode;
pub mod format;
pub mod keycode;

use crate::error::Result;

/// Trait for encoding keys with order preservation.
///
/// Keys must maintain their logical ordering after encoding: range scans over
/// the store double as sort operations.
pub trait Key {
    /// Encode the key to bytes while preserving sort order
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode bytes back to the original key type
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Trait for encoding values for storage.
///
/// Values don't need to preserve ordering, so we can use more efficient
/// serialization methods.
pub trait Value {
    /// Encode the value to bytes
    fn encode(&self) -> Vec<u8>;

    /// Decode bytes back to the original value type
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Error type for encoding operations
#[derive(Debug)]
pub enum EncodingError {
    InvalidFormat(String),
    TruncatedData,
    InvalidUtf8,
    /// A segment contains a byte reserved as a terminator or sentinel.
    ReservedByte(String),
    /// A number does not fit its fixed decimal width.
    Overflow { value: u64, width: usize },
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidFormat(msg) => write!(f, "Invalid encoding format: {}", msg),
            EncodingError::TruncatedData => write!(f, "Truncated data"),
            EncodingError::InvalidUtf8 => write!(f, "Invalid UTF-8 sequence"),
            EncodingError::ReservedByte(segment) => {
                write!(f, "Segment {:?} contains a reserved byte", segment)
            }
            EncodingError::Overflow { value, width } => {
                write!(f, "Value {} does not fit in {} digits", value, width)
            }
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<EncodingError> for crate::Error {
    fn from(err: EncodingError) -> Self {
        match err {
            EncodingError::ReservedByte(_) | EncodingError::Overflow { .. } => {
                crate::Error::Encode(err.to_string())
            }
            _ => crate::Error::Decode(err.to_string()),
        }
    }
}
