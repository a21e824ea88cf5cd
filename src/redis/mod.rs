//! Redis plumbing shared by the cache store and the delivery publisher

pub mod connection;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{
    is_connection_error, sanitize_url, ConnectionMetrics, RedisConfig, RedisConnection,
};
