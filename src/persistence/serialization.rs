//! Serialization utilities: bincode for index files.

use crate::error::{IndexServiceError, Result};
use serde::{Deserialize, Serialize};

/// Encode data to bincode bytes.
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| IndexServiceError::SerializationError(e.to_string()))
}

/// Decode data from bincode bytes.
pub fn from_bincode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| IndexServiceError::SerializationError(e.to_string()))
}
