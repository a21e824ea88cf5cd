//! Error types for the query-processing pipeline

use thiserror::Error;

/// Main error type for the gateway core
#[derive(Error, Debug)]
pub enum Error {
    /// Requested compile target has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A field the operation cannot run without is absent
    ///
    /// Raised when `values` is missing from a query request. The field is
    /// never silently coalesced to empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Input has the wrong shape for the requested operation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cache storage error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Execution backend reported a failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// Model server could not be reached at all
    ///
    /// Besides the error report, the subscriber is told the server is offline.
    #[error("Server unreachable: {0}")]
    ServerUnreachable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cache storage errors
///
/// These surface unchanged to the caller of the cache; the cache itself
/// performs no retries.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Could not reach the record store
    #[error("Connection error: {0}")]
    Connection(String),

    /// Store rejected or failed a command
    #[error("Command failed: {0}")]
    Command(String),

    /// Stored value could not be decoded back into the cached type
    #[error("Decode error: {0}")]
    Decode(String),

    /// Value could not be encoded for storage
    #[error("Encode error: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
