//! Result delivery
//!
//! The core hands finished work to a [`DeliverySink`] as a
//! `(subscriber_key, channel_kind, payload)` triple and knows nothing about
//! the transport behind it.
//!
//! # Channel Names
//!
//! A subscriber key is the fingerprint hash of `{user}_{client_id}`. Each
//! subscriber listens on one channel per kind:
//!
//! ```text
//! QUERY_CHANNEL.{subscriber_key}     queryResult
//! ERROR_CHANNEL.{subscriber_key}     errorMessage
//! JOB_CHANNEL.{subscriber_key}       jobStatus
//! ...
//! ```
//!
//! Two sinks ship with the crate: [`BroadcastSink`] fans out in-process over
//! a tokio broadcast channel and [`RedisPublisher`] publishes JSON envelopes
//! with Redis `PUBLISH`.

use crate::error::{Error, Result};
use crate::fingerprint::hash_text;
use crate::redis::{RedisConfig, RedisConnection};
use crate::request::QueryRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

// ============================================================================
// Channels
// ============================================================================

/// Kind of push channel a message travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Server health
    // Misspelled wire name is part of the client protocol
    #[serde(rename = "hearbeat")]
    Heartbeat,
    /// Job control
    #[serde(rename = "jobs")]
    Jobs,
    /// Query results
    #[serde(rename = "query")]
    Query,
    /// Model metadata
    #[serde(rename = "metadata")]
    Metadata,
    /// User connection info
    #[serde(rename = "info")]
    Info,
    /// Gateway service messages
    #[serde(rename = "service")]
    Service,
    /// Errors
    #[serde(rename = "error")]
    Error,
}

impl ChannelKind {
    /// Every channel kind
    pub const ALL: [ChannelKind; 7] = [
        ChannelKind::Heartbeat,
        ChannelKind::Jobs,
        ChannelKind::Query,
        ChannelKind::Metadata,
        ChannelKind::Info,
        ChannelKind::Service,
        ChannelKind::Error,
    ];

    /// Upper snake name used as the channel prefix
    pub fn group_name(&self) -> &'static str {
        match self {
            ChannelKind::Heartbeat => "HEARTBEAT_CHANNEL",
            ChannelKind::Jobs => "JOB_CHANNEL",
            ChannelKind::Query => "QUERY_CHANNEL",
            ChannelKind::Metadata => "METADATA_CHANNEL",
            ChannelKind::Info => "INFO_CHANNEL",
            ChannelKind::Service => "SERVICE_CHANNEL",
            ChannelKind::Error => "ERROR_CHANNEL",
        }
    }

    /// Client method name a message on this channel is dispatched to
    pub fn message_name(&self) -> &'static str {
        match self {
            ChannelKind::Heartbeat => "heartBeat",
            ChannelKind::Jobs => "jobStatus",
            ChannelKind::Query => "queryResult",
            ChannelKind::Metadata => "modelMetadata",
            ChannelKind::Info => "connectionInfo",
            ChannelKind::Service => "serviceMessage",
            ChannelKind::Error => "errorMessage",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

/// Subscriber key for a user's client connection
pub fn subscriber_key(user: &str, client_id: &str) -> String {
    hash_text(&format!("{}_{}", user, client_id))
}

/// Full channel name, e.g. `QUERY_CHANNEL.{subscriber_key}`
pub fn channel_name(kind: ChannelKind, subscriber_key: &str) -> String {
    format!("{}.{}", kind.group_name(), subscriber_key)
}

// ============================================================================
// Messages
// ============================================================================

/// A typed message bound to one channel kind
pub trait ChannelMessage: Serialize {
    /// Channel the message travels on
    const KIND: ChannelKind;
}

/// Materialized query result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultMessage {
    /// Materialized result
    pub payload: String,
    /// Client data from the request, echoed back
    pub query_metadata: Option<String>,
    /// Receiving user
    pub user_subscriber_name: String,
}

impl ChannelMessage for QueryResultMessage {
    const KIND: ChannelKind = ChannelKind::Query;
}

/// Failure report for a submitted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Error description
    pub payload: String,
    /// Receiving user
    pub user_subscriber_name: String,
    /// Request that failed
    pub submitted_request: Option<QueryRequest>,
}

impl ChannelMessage for ErrorMessage {
    const KIND: ChannelKind = ChannelKind::Error;
}

/// Job lifecycle states reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job was cancelled before it ran
    Cancel,
    /// Cancel could not stop the job
    Failed,
    /// Job was put back on a queue
    Requeue,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Cancel => write!(f, "cancel"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Requeue => write!(f, "requeue"),
        }
    }
}

/// Job status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusMessage {
    /// `YYYY-MM-DD hh:mm:ss` in UTC
    pub timestamp: String,
    /// Affected job
    pub job_id: String,
    /// New status
    pub job_status: JobStatus,
}

impl JobStatusMessage {
    /// Status message stamped with the current time
    pub fn now(job_id: impl Into<String>, job_status: JobStatus) -> Self {
        Self {
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            job_id: job_id.into(),
            job_status,
        }
    }
}

impl ChannelMessage for JobStatusMessage {
    const KIND: ChannelKind = ChannelKind::Jobs;
}

/// Serialized model metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataMessage {
    /// Serialized [`crate::metadata::ModelMetadata`]
    pub payload: String,
    /// Receiving user
    pub user_subscriber_name: String,
}

impl ChannelMessage for MetadataMessage {
    const KIND: ChannelKind = ChannelKind::Metadata;
}

/// Model server health states as clients see them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    /// Server answers queries
    #[serde(rename = "Succeeded")]
    Online,
    /// Server is paused or unreachable
    #[serde(rename = "Paused")]
    Offline,
    /// Server is resuming
    #[serde(rename = "Updating")]
    Updating,
}

/// Server health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMessage {
    /// Report time
    pub timestamp: DateTime<Utc>,
    /// Fully qualified server name
    pub server: String,
    /// Health state
    pub heartbeat_state: ServerState,
    /// Hash of the server and client relation; empty unless online
    pub server_hash: String,
}

impl HeartbeatMessage {
    /// Health report stamped with the current time
    pub fn now(server: impl Into<String>, state: ServerState, server_hash: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            server: server.into(),
            heartbeat_state: state,
            server_hash: server_hash.into(),
        }
    }
}

impl ChannelMessage for HeartbeatMessage {
    const KIND: ChannelKind = ChannelKind::Heartbeat;
}

// ============================================================================
// Sinks
// ============================================================================

/// Downstream push channel
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Hand a payload to the subscriber's channel of the given kind
    async fn deliver(&self, subscriber_key: &str, kind: ChannelKind, payload: &str) -> Result<()>;
}

/// Serialize a typed message and deliver it on its channel
pub async fn send<M: ChannelMessage + Sync>(
    sink: &dyn DeliverySink,
    subscriber_key: &str,
    message: &M,
) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    sink.deliver(subscriber_key, M::KIND, &payload).await
}

/// One delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    /// Full channel name
    pub channel: String,
    /// Client method name
    pub method: String,
    /// Message JSON
    pub payload: String,
}

impl Delivery {
    /// Build the envelope for a triple
    pub fn new(subscriber_key: &str, kind: ChannelKind, payload: &str) -> Self {
        Self {
            channel: channel_name(kind, subscriber_key),
            method: kind.message_name().to_string(),
            payload: payload.to_string(),
        }
    }
}

/// Delivery counters
#[derive(Debug, Default)]
pub struct DeliveryStats {
    /// Messages handed to the transport
    pub delivered: AtomicU64,
    /// Messages with nobody to receive them
    pub dropped: AtomicU64,
    /// Transport failures
    pub failures: AtomicU64,
}

impl DeliveryStats {
    /// (delivered, dropped, failures)
    pub fn counts(&self) -> (u64, u64, u64) {
        (
            self.delivered.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

/// In-process fan-out over a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Delivery>,
    stats: Arc<DeliveryStats>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` messages per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    /// Receive every delivery from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.tx.subscribe()
    }

    /// Delivery counters
    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl DeliverySink for BroadcastSink {
    async fn deliver(&self, subscriber_key: &str, kind: ChannelKind, payload: &str) -> Result<()> {
        let delivery = Delivery::new(subscriber_key, kind, payload);
        match self.tx.send(delivery) {
            Ok(receivers) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %kind, receivers, "Delivered");
            },
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %kind, "No receivers, message dropped");
            },
        }
        Ok(())
    }
}

/// Publishes deliveries with Redis `PUBLISH`
///
/// The message body is the JSON [`Delivery`] envelope.
pub struct RedisPublisher {
    connection: RedisConnection,
    stats: Arc<DeliveryStats>,
}

impl RedisPublisher {
    /// Create a publisher; connects on first delivery
    pub fn new(config: RedisConfig) -> Result<Self> {
        Ok(Self {
            connection: RedisConnection::new(config)?,
            stats: Arc::new(DeliveryStats::default()),
        })
    }

    /// Delivery counters
    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }
}

#[async_trait]
impl DeliverySink for RedisPublisher {
    async fn deliver(&self, subscriber_key: &str, kind: ChannelKind, payload: &str) -> Result<()> {
        let delivery = Delivery::new(subscriber_key, kind, payload);
        let body = serde_json::to_string(&delivery)?;

        let mut conn = self.connection.get().await.map_err(|e| {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            Error::from(e)
        })?;

        let result: std::result::Result<i64, redis::RedisError> =
            conn.publish(&delivery.channel, body).await;
        self.connection.metrics().record_command(&result);

        match result {
            Ok(receivers) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %kind, receivers, "Published delivery");
                Ok(())
            },
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %kind, "Failed to publish delivery");
                Err(self.connection.command_failed(&e).await.into())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        let key = subscriber_key("user@example.com", "conn-1");
        assert_eq!(key, hash_text("user@example.com_conn-1"));
        assert_eq!(
            channel_name(ChannelKind::Query, &key),
            format!("QUERY_CHANNEL.{}", key)
        );
        assert_eq!(channel_name(ChannelKind::Jobs, "k"), "JOB_CHANNEL.k");
    }

    #[test]
    fn test_channel_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChannelKind::Heartbeat).unwrap(),
            "\"hearbeat\""
        );
        assert_eq!(serde_json::to_string(&ChannelKind::Jobs).unwrap(), "\"jobs\"");
        assert_eq!(ChannelKind::Error.message_name(), "errorMessage");

        let names: std::collections::HashSet<_> =
            ChannelKind::ALL.iter().map(|k| k.group_name()).collect();
        assert_eq!(names.len(), ChannelKind::ALL.len());
    }

    #[test]
    fn test_message_json() {
        let message = QueryResultMessage {
            payload: "[]".to_string(),
            query_metadata: Some("m".to_string()),
            user_subscriber_name: "u".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["queryMetadata"], "m");
        assert_eq!(json["userSubscriberName"], "u");

        let status = JobStatusMessage::now("job-1", JobStatus::Cancel);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["jobStatus"], "cancel");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(status.timestamp.len(), "2024-01-01 00:00:00".len());

        let requeued = JobStatusMessage::now("job-2", JobStatus::Requeue);
        assert_eq!(serde_json::to_value(&requeued).unwrap()["jobStatus"], "requeue");
    }

    #[test]
    fn test_heartbeat_json() {
        let message = HeartbeatMessage::now("westeurope.rg.srv", ServerState::Offline, "");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["heartbeatState"], "Paused");
        assert_eq!(json["server"], "westeurope.rg.srv");
        assert_eq!(json["serverHash"], "");

        assert_eq!(serde_json::to_value(ServerState::Online).unwrap(), "Succeeded");
        assert_eq!(serde_json::to_value(ServerState::Updating).unwrap(), "Updating");
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_envelope() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();

        let message = ErrorMessage {
            payload: "boom".to_string(),
            user_subscriber_name: "u".to_string(),
            submitted_request: None,
        };
        send(&sink, "key", &message).await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.channel, "ERROR_CHANNEL.key");
        assert_eq!(delivery.method, "errorMessage");
        let parsed: ErrorMessage = serde_json::from_str(&delivery.payload).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(sink.stats().counts(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_broadcast_without_receivers_is_not_an_error() {
        let sink = BroadcastSink::default();
        sink.deliver("key", ChannelKind::Service, "{}").await.unwrap();
        assert_eq!(sink.stats().counts(), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_redis_publisher_unreachable() {
        let config = RedisConfig::with_url("redis://127.0.0.1:1")
            .connection_timeout(std::time::Duration::from_millis(200));
        let publisher = RedisPublisher::new(config).unwrap();

        assert!(publisher.deliver("k", ChannelKind::Query, "{}").await.is_err());
        assert_eq!(publisher.stats().counts(), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_redis_publisher_reconnects_after_hang_up() {
        let url = crate::redis::testing::spawn_fake_server("PUBLISH").await;
        let publisher = RedisPublisher::new(RedisConfig::with_url(url)).unwrap();

        assert!(publisher.deliver("k", ChannelKind::Query, "{}").await.is_err());
        assert!(!publisher.connection.is_connected().await);

        assert!(publisher.deliver("k", ChannelKind::Query, "{}").await.is_err());
        let metrics = publisher.connection.metrics();
        assert_eq!(metrics.connections_created.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.command_failures.load(Ordering::Relaxed), 2);
        assert_eq!(publisher.stats().counts(), (0, 0, 2));
    }
}
