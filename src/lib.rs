//! OLAP Gateway - query processing core for analytical model servers
//!
//! This library turns structured query requests into MDX, runs them through
//! a pluggable execution backend and shapes the tabular results for clients:
//! - Deterministic request fingerprints for result caching
//! - MDX compilation from values, filters, slices and custom definitions
//! - Five JSON result shapes plus an unpivot transform
//! - TTL-bounded fingerprint cache over memory or Redis
//! - Per-host shard queues with fire-and-forget dispatch

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod request;

/// Deterministic request fingerprints
pub mod fingerprint;

/// MDX query text generation
pub mod compiler;

/// Tabular result shaping (table, dictionary, key/value, 2D array, unpivot)
pub mod materialize;

/// Fingerprint-keyed result cache with TTL expiry
/// Provides in-memory and Redis hash backed record stores
pub mod cache;

/// Redis connection management shared by the cache and the publisher
pub mod redis;

/// Per-host queue naming, random assignment and job dispatch
pub mod shard;

/// Channel naming, message payloads and delivery sinks
pub mod delivery;

/// Model metadata arena (dimensions, attributes, members, measures)
pub mod metadata;

/// Submit, process and cancel flow over all of the above
pub mod pipeline;

/// Configuration management with TOML support
pub mod config;

// Re-export main types
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, Fingerprinted};
pub use pipeline::{ExecutionBackend, MetadataJob, ProcessorBuilder, QueryJob, QueryProcessor};
pub use request::{CompilationTarget, OutputFormat, QueryRequest, RequestContext};
