//! Value codecs
//!
//! The record store is schemaless and keeps values as text. A codec is
//! picked once when the cache is built and decides how `T` maps to that
//! text.

use crate::error::CacheError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts cached values to and from their stored text form
pub trait ValueCodec<T>: Send + Sync {
    /// Encode a value for storage
    fn encode(&self, value: &T) -> Result<String, CacheError>;

    /// Decode a stored value
    fn decode(&self, text: &str) -> Result<T, CacheError>;
}

/// Stores strings verbatim
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl ValueCodec<String> for TextCodec {
    fn encode(&self, value: &String) -> Result<String, CacheError> {
        Ok(value.clone())
    }

    fn decode(&self, text: &str) -> Result<String, CacheError> {
        Ok(text.to_string())
    }
}

/// Stores composite values as JSON
///
/// Field naming follows `T`'s own serde attributes.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a JSON codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> ValueCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<String, CacheError> {
        serde_json::to_string(value).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<T, CacheError> {
        serde_json::from_str(text).map_err(|e| CacheError::Decode(e.to_string()))
    }
}
