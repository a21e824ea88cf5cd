//! Shard Assigner
//!
//! Each host owns a private set of work queues and only ever dispatches into
//! its own set. The set is a pure function of worker count and host id:
//!
//! ```text
//! count = max(1, workers / 2)
//! names = queue-for-{host}-0 .. queue-for-{host}-{count-1}   (lowercased)
//! ```
//!
//! Picking a queue is uniform-random over that set. The random source is
//! injected so tests can seed it.
//!
//! Dispatch is fire-and-forget: it returns a job id immediately and results
//! travel back through delivery, never through the dispatch call. Duplicate
//! jobs are not detected here.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Queue names owned by a host
///
/// # Example
///
/// ```rust
/// use olap_gateway::shard::shard_queues;
///
/// assert_eq!(
///     shard_queues(7, "testABC"),
///     vec!["queue-for-testabc-0", "queue-for-testabc-1", "queue-for-testabc-2"]
/// );
/// ```
pub fn shard_queues(worker_count: usize, host: &str) -> Vec<String> {
    let count = (worker_count / 2).max(1);
    (0..count)
        .map(|i| format!("queue-for-{}-{}", host, i).to_lowercase())
        .collect()
}

// ============================================================================
// Assigner
// ============================================================================

/// Uniform random pick among one host's queues
#[derive(Debug)]
pub struct ShardAssigner {
    queues: Vec<String>,
    rng: StdRng,
}

impl ShardAssigner {
    /// Create an assigner with an explicit random source
    pub fn new(worker_count: usize, host: &str, rng: StdRng) -> Self {
        Self {
            queues: shard_queues(worker_count, host),
            rng,
        }
    }

    /// Create an assigner seeded from a fixed value
    pub fn seeded(worker_count: usize, host: &str, seed: u64) -> Self {
        Self::new(worker_count, host, StdRng::seed_from_u64(seed))
    }

    /// Create an assigner seeded from OS entropy
    pub fn from_entropy(worker_count: usize, host: &str) -> Self {
        Self::new(worker_count, host, StdRng::from_entropy())
    }

    /// This host's queues
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Pick a queue
    pub fn assign(&mut self) -> &str {
        // shard_queues never yields an empty set
        let index = self.rng.gen_range(0..self.queues.len());
        &self.queues[index]
    }
}

// ============================================================================
// Job Queue
// ============================================================================

/// Opaque job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap an identifier issued by a job runtime
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External job runtime
///
/// `enqueue` must return without waiting for the job to run.
pub trait JobQueue<J>: Send + Sync {
    /// Put a job on a named queue
    fn enqueue(&self, queue: &str, job: J) -> JobId;

    /// Best-effort cancel; `true` when the job was stopped before running
    fn cancel(&self, job_id: &JobId) -> bool;

    /// Put a known job back on its queue; `false` when the job is unknown
    fn requeue(&self, job_id: &JobId) -> bool;
}

/// Per-queue FIFO runtime for local runs and tests
///
/// Cancelled jobs are parked, not dropped, so they can be requeued.
pub struct InMemoryJobQueue<J> {
    queues: Mutex<HashMap<String, VecDeque<(JobId, J)>>>,
    cancelled: Mutex<HashMap<JobId, (String, J)>>,
    next_id: AtomicU64,
}

impl<J> Default for InMemoryJobQueue<J> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<J> InMemoryJobQueue<J> {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the oldest pending job of a queue
    pub fn take(&self, queue: &str) -> Option<(JobId, J)> {
        self.queues.lock().get_mut(queue)?.pop_front()
    }

    /// Pop the oldest pending job across all queues, queues visited by name
    pub fn take_any(&self) -> Option<(JobId, J)> {
        let mut queues = self.queues.lock();
        let mut names: Vec<&String> = queues.keys().collect();
        names.sort();
        let name = names
            .into_iter()
            .find(|name| queues.get(*name).is_some_and(|q| !q.is_empty()))?
            .clone();
        queues.get_mut(&name)?.pop_front()
    }

    /// Number of pending jobs on a queue
    pub fn pending(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, VecDeque::len)
    }

    /// Number of pending jobs across all queues
    pub fn total_pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }

    /// Check if a job was cancelled
    pub fn is_cancelled(&self, job_id: &JobId) -> bool {
        self.cancelled.lock().contains_key(job_id)
    }
}

impl<J: Send> JobQueue<J> for InMemoryJobQueue<J> {
    fn enqueue(&self, queue: &str, job: J) -> JobId {
        let id = JobId(format!("job-{}", self.next_id.fetch_add(1, Ordering::Relaxed)));
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back((id.clone(), job));
        id
    }

    fn cancel(&self, job_id: &JobId) -> bool {
        let mut queues = self.queues.lock();
        for (name, queue) in queues.iter_mut() {
            if let Some(pos) = queue.iter().position(|(id, _)| id == job_id) {
                if let Some((id, job)) = queue.remove(pos) {
                    self.cancelled.lock().insert(id, (name.clone(), job));
                    return true;
                }
            }
        }
        false
    }

    fn requeue(&self, job_id: &JobId) -> bool {
        let mut queues = self.queues.lock();
        if queues.values().any(|queue| queue.iter().any(|(id, _)| id == job_id)) {
            return true;
        }
        match self.cancelled.lock().remove(job_id) {
            Some((name, job)) => {
                queues.entry(name).or_default().push_back((job_id.clone(), job));
                true
            },
            None => false,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes jobs into this host's queues
pub struct Dispatcher<J> {
    assigner: Mutex<ShardAssigner>,
    queue: Arc<dyn JobQueue<J>>,
}

impl<J> Dispatcher<J> {
    /// Create a dispatcher
    pub fn new(assigner: ShardAssigner, queue: Arc<dyn JobQueue<J>>) -> Self {
        Self {
            assigner: Mutex::new(assigner),
            queue,
        }
    }

    /// Enqueue a job on a randomly chosen own queue
    pub fn dispatch(&self, job: J) -> JobId {
        let queue = self.assigner.lock().assign().to_string();
        let id = self.queue.enqueue(&queue, job);
        info!(job_id = %id, queue = %queue, "Job dispatched");
        id
    }

    /// Forward a cancel request to the runtime
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let cancelled = self.queue.cancel(job_id);
        debug!(job_id = %job_id, cancelled, "Cancel requested");
        cancelled
    }

    /// Forward a requeue request to the runtime
    pub fn requeue(&self, job_id: &JobId) -> bool {
        let requeued = self.queue.requeue(job_id);
        debug!(job_id = %job_id, requeued, "Requeue requested");
        requeued
    }

    /// This host's queues
    pub fn queues(&self) -> Vec<String> {
        self.assigner.lock().queues().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_counts() {
        assert_eq!(
            shard_queues(7, "testABC"),
            vec!["queue-for-testabc-0", "queue-for-testabc-1", "queue-for-testabc-2"]
        );
        assert_eq!(shard_queues(1, "testABC"), vec!["queue-for-testabc-0"]);
        assert_eq!(shard_queues(0, "h").len(), 1);
        assert_eq!(shard_queues(8, "h").len(), 4);
    }

    #[test]
    fn test_assign_stays_on_own_queues() {
        let mut assigner = ShardAssigner::seeded(10, "Host-A", 7);
        let own = assigner.queues().to_vec();
        for _ in 0..200 {
            let queue = assigner.assign().to_string();
            assert!(own.contains(&queue));
            assert!(queue.starts_with("queue-for-host-a-"));
        }
    }

    #[test]
    fn test_seeded_assigner_is_deterministic() {
        let mut a = ShardAssigner::seeded(10, "h", 42);
        let mut b = ShardAssigner::seeded(10, "h", 42);
        let picks_a: Vec<String> = (0..20).map(|_| a.assign().to_string()).collect();
        let picks_b: Vec<String> = (0..20).map(|_| b.assign().to_string()).collect();
        assert_eq!(picks_a, picks_b);
    }

    #[test]
    fn test_assign_covers_all_queues() {
        let mut assigner = ShardAssigner::seeded(6, "h", 1);
        let picked: std::collections::HashSet<String> = (0..300).map(|_| assigner.assign().to_string()).collect();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn test_dispatch_does_not_deduplicate() {
        let runtime = Arc::new(InMemoryJobQueue::new());
        let dispatcher = Dispatcher::new(ShardAssigner::seeded(2, "h", 0), runtime.clone());

        let first = dispatcher.dispatch("same");
        let second = dispatcher.dispatch("same");

        assert_ne!(first, second);
        assert_eq!(runtime.pending("queue-for-h-0"), 2);
        assert_eq!(runtime.take("queue-for-h-0"), Some((first, "same")));
    }

    #[test]
    fn test_cancel_pending_job() {
        let runtime = Arc::new(InMemoryJobQueue::new());
        let dispatcher = Dispatcher::new(ShardAssigner::seeded(2, "h", 0), runtime.clone());

        let id = dispatcher.dispatch(1u32);
        assert!(dispatcher.cancel(&id));
        assert!(runtime.is_cancelled(&id));
        assert_eq!(runtime.total_pending(), 0);
        assert!(!dispatcher.cancel(&id));
    }

    #[test]
    fn test_requeue_restores_cancelled_job() {
        let runtime = Arc::new(InMemoryJobQueue::new());
        let dispatcher = Dispatcher::new(ShardAssigner::seeded(2, "h", 0), runtime.clone());

        let first = dispatcher.dispatch("a");
        let second = dispatcher.dispatch("b");
        assert!(dispatcher.cancel(&first));

        assert!(dispatcher.requeue(&first));
        assert!(!runtime.is_cancelled(&first));
        assert_eq!(runtime.take("queue-for-h-0"), Some((second, "b")));
        assert_eq!(runtime.take("queue-for-h-0"), Some((first.clone(), "a")));

        // Taken jobs are gone from the runtime
        assert!(!dispatcher.requeue(&first));
        assert!(!dispatcher.requeue(&JobId::new("job-404")));
    }

    #[test]
    fn test_requeue_pending_job_is_noop() {
        let runtime = InMemoryJobQueue::new();
        let id = runtime.enqueue("q", 1);
        assert!(runtime.requeue(&id));
        assert_eq!(runtime.pending("q"), 1);
    }

    #[test]
    fn test_take_any_visits_queues_by_name() {
        let runtime = InMemoryJobQueue::new();
        runtime.enqueue("b", 2);
        runtime.enqueue("a", 1);
        assert_eq!(runtime.take_any().map(|(_, job)| job), Some(1));
        assert_eq!(runtime.take_any().map(|(_, job)| job), Some(2));
        assert!(runtime.take_any().is_none());
    }
}
