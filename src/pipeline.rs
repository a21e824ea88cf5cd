//! Query processing pipeline
//!
//! [`QueryProcessor`] wires the pieces together:
//!
//! ```text
//! submit ──► Dispatcher ──► own shard queue
//!                               │
//! process ◄─────────────────────┘
//!   fingerprint ─► cache lookup─┬─ hit ────────────────────────────────┐
//!                               └─ miss ─► compile ─► execute ─►       │
//!                                          materialize ─► cache write  │
//!                                                                      ▼
//!                                                   deliver queryResult / errorMessage
//! ```
//!
//! Submission never waits for execution. Failures during processing are
//! delivered to the subscriber as `errorMessage` on the error channel and
//! never returned to the submitter. When the model server cannot be reached
//! at all, the subscriber also gets an offline `heartBeat`.
//!
//! Model metadata follows the same shape: cached per `{user}#{fingerprint}`,
//! read through the backend on a miss and delivered as `modelMetadata`.

use crate::cache::{FingerprintCache, MemoryStore, DEFAULT_TTL_SECS};
use crate::compiler::compile;
use crate::delivery::{
    send, subscriber_key, ChannelMessage, DeliverySink, ErrorMessage, HeartbeatMessage,
    JobStatus, JobStatusMessage, MetadataMessage, QueryResultMessage, ServerState,
};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::materialize::{is_empty_response, materialize, RowSet, TabularCursor};
use crate::metadata::ModelMetadata;
use crate::request::{LaunchRequest, MetadataRequest, OutputFormat, QueryRequest, RequestContext};
use crate::shard::{Dispatcher, InMemoryJobQueue, JobId, JobQueue, ShardAssigner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache group key for a user's view of a fingerprint in a format
pub fn cache_key(user: &str, fingerprint: &Fingerprint, format: OutputFormat) -> String {
    format!("{}#{}#{}", user, fingerprint, format.code())
}

/// Cache group key for a user's view of a model's metadata
pub fn metadata_cache_key(user: &str, fingerprint: &Fingerprint) -> String {
    format!("{}#{}", user, fingerprint)
}

// ============================================================================
// Collaborators
// ============================================================================

/// Runs compiled query text against a model server
///
/// `Ok(None)` means the server produced no reader at all, which materializes
/// to the empty sentinel. Backends report a server they cannot reach with
/// [`Error::ServerUnreachable`].
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Execute query text for a request
    async fn execute(&self, query_text: &str, request: &QueryRequest) -> Result<Option<RowSet>>;

    /// Read the dimension and measure structure of the requested model
    async fn metadata(&self, _request: &MetadataRequest) -> Result<Option<ModelMetadata>> {
        Err(Error::NotImplemented("model metadata".to_string()))
    }

    /// Resume the target server if it is paused
    ///
    /// Returns `true` when a resume was started.
    async fn resume_server(&self, _request: &LaunchRequest) -> Result<bool> {
        Ok(false)
    }
}

/// Unit of work carried through the job queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJob {
    /// Request to run
    pub request: QueryRequest,
    /// Submitting user
    pub user: String,
    /// Client connection that receives the result
    pub client_id: String,
}

impl QueryJob {
    /// Subscriber key for the job's owner
    pub fn subscriber_key(&self) -> String {
        subscriber_key(&self.user, &self.client_id)
    }
}

/// Request for a model's metadata on behalf of a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataJob {
    /// Model to describe
    pub request: MetadataRequest,
    /// Submitting user
    pub user: String,
    /// Client connection that receives the metadata
    pub client_id: String,
}

impl MetadataJob {
    /// Subscriber key for the job's owner
    pub fn subscriber_key(&self) -> String {
        subscriber_key(&self.user, &self.client_id)
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`QueryProcessor`]
///
/// Only the execution backend is required. Without a job queue an
/// in-process queue is used and [`QueryProcessor::run_local`] drains it.
pub struct ProcessorBuilder {
    backend: Option<Arc<dyn ExecutionBackend>>,
    queue: Option<Arc<dyn JobQueue<QueryJob>>>,
    cache: Option<FingerprintCache<String>>,
    sink: Option<Arc<dyn DeliverySink>>,
    workers: usize,
    host: String,
    seed: Option<u64>,
    cache_ttl: u64,
}

impl Default for ProcessorBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            queue: None,
            cache: None,
            sink: None,
            workers: 2,
            host: "localhost".to_string(),
            seed: None,
            cache_ttl: DEFAULT_TTL_SECS,
        }
    }
}

impl ProcessorBuilder {
    /// Start an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the execution backend (required)
    pub fn backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use an external job runtime
    pub fn job_queue(mut self, queue: Arc<dyn JobQueue<QueryJob>>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Enable result caching
    pub fn cache(mut self, cache: FingerprintCache<String>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enable result caching over an in-process store
    pub fn memory_cache(self) -> Self {
        self.cache(FingerprintCache::text(Arc::new(MemoryStore::new())))
    }

    /// Set where results are pushed
    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Worker count, which sizes the shard set
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Host identifier used in queue names
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Seed queue selection
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// TTL for cached results
    pub fn cache_ttl(mut self, ttl_seconds: u64) -> Self {
        self.cache_ttl = ttl_seconds;
        self
    }

    /// Build the processor
    pub fn build(self) -> Result<QueryProcessor> {
        let backend = self
            .backend
            .ok_or_else(|| Error::Configuration("an execution backend is required".to_string()))?;

        if self.host.trim().is_empty() {
            return Err(Error::Configuration("host cannot be empty".to_string()));
        }

        let assigner = match self.seed {
            Some(seed) => ShardAssigner::seeded(self.workers, &self.host, seed),
            None => ShardAssigner::from_entropy(self.workers, &self.host),
        };

        let (queue, local_queue) = match self.queue {
            Some(queue) => (queue, None),
            None => {
                let local = Arc::new(InMemoryJobQueue::new());
                let shared: Arc<dyn JobQueue<QueryJob>> = local.clone();
                (shared, Some(local))
            },
        };

        let cache_ttl = self.cache_ttl;
        Ok(QueryProcessor {
            backend,
            dispatcher: Dispatcher::new(assigner, queue),
            local_queue,
            cache: self.cache.map(|c| c.with_default_ttl(cache_ttl)),
            sink: self.sink,
        })
    }
}

// ============================================================================
// Processor
// ============================================================================

/// Submits, processes and cancels query jobs
pub struct QueryProcessor {
    backend: Arc<dyn ExecutionBackend>,
    dispatcher: Dispatcher<QueryJob>,
    local_queue: Option<Arc<InMemoryJobQueue<QueryJob>>>,
    cache: Option<FingerprintCache<String>>,
    sink: Option<Arc<dyn DeliverySink>>,
}

impl QueryProcessor {
    /// Start building a processor
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::new()
    }

    /// This host's queues
    pub fn queues(&self) -> Vec<String> {
        self.dispatcher.queues()
    }

    /// Result cache, if enabled
    pub fn cache(&self) -> Option<&FingerprintCache<String>> {
        self.cache.as_ref()
    }

    /// Enqueue a request on one of this host's queues
    ///
    /// Returns as soon as the job is queued. Identical requests are queued
    /// again; deduplication only happens through the cache at process time.
    pub fn submit(&self, request: QueryRequest, user: &str, client_id: &str) -> JobId {
        let job = QueryJob {
            request,
            user: user.to_string(),
            client_id: client_id.to_string(),
        };
        let id = self.dispatcher.dispatch(job);
        info!(job_id = %id, user, "Query submitted");
        id
    }

    /// Run one job and deliver its outcome
    pub async fn process(&self, job: QueryJob) {
        let key = job.subscriber_key();
        match self.run(&job).await {
            Ok(payload) => {
                let message = QueryResultMessage {
                    payload,
                    query_metadata: job.request.context.request_metadata.clone(),
                    user_subscriber_name: job.user.clone(),
                };
                self.deliver(&key, &message).await;
            },
            Err(e) => {
                warn!(user = %job.user, error = %e, "Query failed");
                let context = job.request.context.clone();
                self.report_failure(&key, &job.user, &context, &e, Some(job.request))
                    .await;
            },
        }
    }

    /// Look up a model's metadata and deliver it as `modelMetadata`
    pub async fn process_metadata(&self, job: MetadataJob) {
        let key = job.subscriber_key();
        match self.run_metadata(&job).await {
            Ok(payload) => {
                let message = MetadataMessage {
                    payload,
                    user_subscriber_name: job.user.clone(),
                };
                self.deliver(&key, &message).await;
            },
            Err(e) => {
                warn!(user = %job.user, error = %e, "Metadata request failed");
                self.report_failure(&key, &job.user, &job.request.context, &e, None)
                    .await;
            },
        }
    }

    /// Bring the target server online and report it on the heartbeat channel
    ///
    /// A paused server is reported as updating while it resumes. Once online,
    /// the heartbeat carries the launch fingerprint as the server hash.
    pub async fn launch(&self, request: LaunchRequest, user: &str, client_id: &str) {
        let key = subscriber_key(user, client_id);
        let server = request.context.server_qualified_name().unwrap_or_default();

        let outcome = async {
            let server_hash = Fingerprint::of(&request)?;
            if self.backend.resume_server(&request).await? {
                info!(server = %server, "Resuming paused server");
                self.deliver(&key, &HeartbeatMessage::now(&server, ServerState::Updating, ""))
                    .await;
            }
            Ok::<_, Error>(server_hash)
        }
        .await;

        match outcome {
            Ok(server_hash) => {
                let message =
                    HeartbeatMessage::now(&server, ServerState::Online, server_hash.as_str());
                self.deliver(&key, &message).await;
            },
            Err(e) => {
                warn!(server = %server, error = %e, "Launch failed");
                self.report_failure(&key, user, &request.context, &e, None).await;
            },
        }
    }

    /// Process every job waiting on the in-process queue
    ///
    /// Returns the number of jobs processed; always 0 with an external
    /// runtime.
    pub async fn run_local(&self) -> usize {
        let Some(queue) = &self.local_queue else {
            return 0;
        };

        let mut processed = 0;
        while let Some((id, job)) = queue.take_any() {
            debug!(job_id = %id, "Processing local job");
            self.process(job).await;
            processed += 1;
        }
        processed
    }

    /// Best-effort cancel, reported on the job channel
    pub async fn cancel(&self, job_id: &JobId, user: &str, client_id: &str) -> JobStatus {
        let status = if self.dispatcher.cancel(job_id) {
            JobStatus::Cancel
        } else {
            JobStatus::Failed
        };

        let message = JobStatusMessage::now(job_id.as_str(), status);
        self.deliver(&subscriber_key(user, client_id), &message).await;
        status
    }

    /// Put a job back on its queue, reported on the job channel
    pub async fn requeue(&self, job_id: &JobId, user: &str, client_id: &str) -> JobStatus {
        let status = if self.dispatcher.requeue(job_id) {
            JobStatus::Requeue
        } else {
            JobStatus::Failed
        };

        let message = JobStatusMessage::now(job_id.as_str(), status);
        self.deliver(&subscriber_key(user, client_id), &message).await;
        status
    }

    async fn run(&self, job: &QueryJob) -> Result<String> {
        let request = &job.request;
        let fingerprint = Fingerprint::of(request)?;
        let group = cache_key(&job.user, &fingerprint, request.output_format);

        if let Some(cache) = &self.cache {
            match cache.get(&group).await {
                Ok(Some(entry)) => return Ok(entry.value),
                Ok(None) => {},
                Err(e) => warn!(error = %e, "Cache lookup failed, running uncached"),
            }
        }

        let query_text = compile(request)?;
        debug!(fingerprint = %fingerprint, "Executing query");

        let payload = match self.backend.execute(&query_text, request).await? {
            Some(mut rows) => materialize(Some(&mut rows as &mut dyn TabularCursor), request.output_format)?,
            None => materialize(None, request.output_format)?,
        };

        if let Some(cache) = &self.cache {
            if !is_empty_response(&payload) {
                if let Err(e) = cache.set_default(&group, &job.subscriber_key(), &payload).await {
                    warn!(error = %e, "Cache write failed");
                }
            }
        }

        Ok(payload)
    }

    async fn run_metadata(&self, job: &MetadataJob) -> Result<String> {
        let fingerprint = Fingerprint::of(&job.request)?;
        let group = metadata_cache_key(&job.user, &fingerprint);

        if let Some(cache) = &self.cache {
            match cache.get(&group).await {
                Ok(Some(entry)) => return Ok(entry.value),
                Ok(None) => {},
                Err(e) => warn!(error = %e, "Cache lookup failed, reading metadata uncached"),
            }
        }

        let Some(metadata) = self.backend.metadata(&job.request).await? else {
            return Ok("null".to_string());
        };
        let payload = metadata.to_json()?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set_default(&group, &job.subscriber_key(), &payload).await {
                warn!(error = %e, "Cache write failed");
            }
        }

        Ok(payload)
    }

    async fn report_failure(
        &self,
        key: &str,
        user: &str,
        context: &RequestContext,
        error: &Error,
        submitted_request: Option<QueryRequest>,
    ) {
        let message = ErrorMessage {
            payload: error.to_string(),
            user_subscriber_name: user.to_string(),
            submitted_request,
        };
        self.deliver(key, &message).await;

        if matches!(error, Error::ServerUnreachable(_)) {
            let server = context.server_qualified_name().unwrap_or_default();
            self.deliver(key, &HeartbeatMessage::now(server, ServerState::Offline, ""))
                .await;
        }
    }

    async fn deliver<M: ChannelMessage + Sync>(&self, key: &str, message: &M) {
        let Some(sink) = &self.sink else {
            debug!(channel = %M::KIND, "No delivery sink, message dropped");
            return;
        };
        if let Err(e) = send(sink.as_ref(), key, message).await {
            warn!(channel = %M::KIND, error = %e, "Delivery failed");
        }
    }
}
