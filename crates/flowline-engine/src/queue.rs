// In-memory job queue with a single worker task
//
// FIFO admission over job ids plus a job map for status tracking. The
// worker takes one job at a time, runs the installed processor, and
// awaits every completion handler before the next pop. Retries sleep
// inline with exponential backoff and re-append to the tail without
// notifying completion.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flowline_core::{EngineError, JobResult, JobStatus, NodeJob, Result};

/// Processes one job attempt. An `Err` is treated as a non-retryable
/// failure for that invocation, to prevent pathological retry loops.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: NodeJob) -> anyhow::Result<JobResult>;
}

/// Receives every terminal job result (success, or failure after the
/// retry budget is exhausted). Called from the worker task; the next
/// job does not start until this returns.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_job_completed(&self, result: JobResult);
}

#[derive(Default)]
struct QueueInner {
    /// Job ids in FIFO order
    queue: VecDeque<String>,
    /// All jobs by id, every status
    jobs: HashMap<String, NodeJob>,
}

/// FIFO job queue with retry/backoff and cancellation
pub struct JobQueue {
    name: String,
    inner: Mutex<QueueInner>,
    notify: Notify,
    processor: RwLock<Option<Arc<dyn JobProcessor>>>,
    completion_handlers: RwLock<Vec<Arc<dyn CompletionHandler>>>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(JobQueue {
            name: name.into(),
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            processor: RwLock::new(None),
            completion_handlers: RwLock::new(Vec::new()),
            shutdown_tx,
            worker: Mutex::new(None),
        })
    }

    /// Append a job to the tail of the queue
    pub async fn add(&self, job: NodeJob) -> String {
        let job_id = job.id.clone();
        {
            let mut inner = self.inner.lock().await;
            inner.jobs.insert(job_id.clone(), job);
            inner.queue.push_back(job_id.clone());
        }
        self.notify.notify_one();
        job_id
    }

    /// Get a job by id
    pub async fn get_job(&self, job_id: &str) -> Option<NodeJob> {
        let inner = self.inner.lock().await;
        inner.jobs.get(job_id).cloned()
    }

    /// All jobs for an execution
    pub async fn jobs_by_execution(&self, execution_id: &str) -> Vec<NodeJob> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .values()
            .filter(|j| j.execution_id == execution_id)
            .cloned()
            .collect()
    }

    /// Number of jobs waiting to be processed
    pub async fn pending_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.queue.len()
    }

    /// Total number of jobs, all statuses
    pub async fn total_jobs(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.jobs.len()
    }

    /// Cancel a job if it is pending or running.
    ///
    /// Pending jobs are removed from the queue; a running job finishes
    /// its current attempt. Returns whether a cancellation happened.
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let mut inner = self.inner.lock().await;

        let Some(job) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        if !matches!(job.status, JobStatus::Pending | JobStatus::Running) {
            return false;
        }

        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        job.error = Some("Cancelled by user".to_string());

        inner.queue.retain(|id| id != job_id);
        true
    }

    /// Cancel every job for an execution. Returns the number cancelled.
    pub async fn cancel_execution(&self, execution_id: &str) -> usize {
        let job_ids: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .jobs
                .values()
                .filter(|j| j.execution_id == execution_id)
                .map(|j| j.id.clone())
                .collect()
        };

        let mut cancelled = 0;
        for job_id in job_ids {
            if self.cancel_job(&job_id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Install the function the worker calls for each job
    pub async fn set_processor(&self, processor: Arc<dyn JobProcessor>) {
        *self.processor.write().await = Some(processor);
    }

    /// Register a completion callback
    pub async fn on_completed(&self, handler: Arc<dyn CompletionHandler>) {
        self.completion_handlers.write().await.push(handler);
    }

    /// Start the background worker. Requires a processor.
    pub async fn start_worker(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }

        if self.processor.read().await.is_none() {
            return Err(EngineError::queue("no processor set"));
        }

        let _ = self.shutdown_tx.send(false);
        let queue = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();

        info!(queue = %self.name, "Starting queue worker");
        *worker = Some(tokio::spawn(worker_loop(queue, shutdown_rx)));

        Ok(())
    }

    /// Stop the background worker
    pub async fn stop_worker(&self) {
        let _ = self.shutdown_tx.send(true);
        self.notify.notify_one();

        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.take() {
            handle.abort();
            let _ = handle.await;
            info!(queue = %self.name, "Queue worker stopped");
        }
    }

    /// Wait until no job is queued or running (test support)
    pub async fn drain(&self) {
        loop {
            let busy = {
                let inner = self.inner.lock().await;
                !inner.queue.is_empty()
                    || inner.jobs.values().any(|j| j.status == JobStatus::Running)
            };
            if !busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Pop the next runnable job, skipping cancelled ids, and mark it
    /// running.
    async fn take_next_job(&self) -> Option<NodeJob> {
        let mut inner = self.inner.lock().await;

        while let Some(job_id) = inner.queue.pop_front() {
            let Some(job) = inner.jobs.get_mut(&job_id) else {
                continue;
            };
            if job.status == JobStatus::Cancelled {
                continue;
            }

            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            return Some(job.clone());
        }

        None
    }

    async fn process_job(&self, job: NodeJob) {
        debug!(
            queue = %self.name,
            job_id = %job.id,
            node_id = %job.node_id,
            retry_count = job.retry_count,
            "Processing job"
        );

        let processor = self.processor.read().await.clone();
        let outcome = match processor {
            Some(processor) => processor.process(job.clone()).await,
            None => Err(anyhow::anyhow!("no processor set")),
        };

        match outcome {
            Ok(result) if result.success => {
                self.finish_job(&job.id, JobStatus::Completed, &result).await;
                self.notify_completion(result).await;
            }
            Ok(result) => {
                // Failed attempt: retry while the budget allows
                let retry = {
                    let mut inner = self.inner.lock().await;
                    match inner.jobs.get_mut(&job.id) {
                        Some(stored) if stored.status == JobStatus::Running && stored.can_retry() => {
                            stored.status = JobStatus::Pending;
                            stored.started_at = None;
                            stored.retry_count += 1;
                            Some((stored.retry_count, stored.retry_backoff_ms))
                        }
                        _ => None,
                    }
                };

                match retry {
                    Some((retry_count, backoff_ms)) => {
                        let backoff = backoff_ms.saturating_mul(1u64 << retry_count.min(20));
                        warn!(
                            job_id = %job.id,
                            node_id = %job.node_id,
                            retry_count,
                            backoff_ms = backoff,
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "Job failed, retrying after backoff"
                        );
                        tokio::time::sleep(Duration::from_millis(backoff)).await;

                        let mut inner = self.inner.lock().await;
                        // The job may have been cancelled during the sleep
                        if inner.jobs.get(&job.id).map(|j| j.status) == Some(JobStatus::Pending) {
                            inner.queue.push_back(job.id.clone());
                        }
                        // Retries do not notify completion
                    }
                    None => {
                        self.finish_job(&job.id, JobStatus::Failed, &result).await;
                        self.notify_completion(result).await;
                    }
                }
            }
            Err(e) => {
                // Processor errors are non-retryable for this invocation
                error!(job_id = %job.id, error = %e, "Job processor error");
                let result = JobResult {
                    job_id: job.id.clone(),
                    node_id: job.node_id.clone(),
                    execution_id: job.execution_id.clone(),
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                    duration_ms: 0,
                    cached: false,
                };
                self.finish_job(&job.id, JobStatus::Failed, &result).await;
                self.notify_completion(result).await;
            }
        }
    }

    async fn finish_job(&self, job_id: &str, status: JobStatus, result: &JobResult) {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.jobs.get_mut(job_id) {
            // A cancelled job keeps its cancelled status
            if job.status != JobStatus::Cancelled {
                job.status = status;
            }
            job.completed_at = Some(Utc::now());
            job.output = result.output.clone();
            job.error = result.error.clone();
        }
    }

    async fn notify_completion(&self, result: JobResult) {
        let handlers = self.completion_handlers.read().await.clone();
        for handler in handlers {
            handler.on_job_completed(result.clone()).await;
        }
    }
}

/// Worker loop: one job at a time until shutdown
async fn worker_loop(queue: Arc<JobQueue>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match queue.take_next_job().await {
            Some(job) => queue.process_job(job).await,
            None => {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = queue.notify.notified() => {}
                }
            }
        }
    }

    debug!("Queue worker loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::JsonMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn job(id: &str, execution_id: &str) -> NodeJob {
        NodeJob {
            id: id.to_string(),
            tenant_id: "tenant-1".to_string(),
            execution_id: execution_id.to_string(),
            workflow_id: "wf-1".to_string(),
            node_id: format!("node-{id}"),
            node_type: "agent".to_string(),
            agent_id: None,
            node_config: JsonMap::new(),
            inputs: JsonMap::new(),
            status: JobStatus::Pending,
            max_retries: 2,
            retry_count: 0,
            retry_backoff_ms: 1,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        }
    }

    struct OkProcessor;

    #[async_trait]
    impl JobProcessor for OkProcessor {
        async fn process(&self, job: NodeJob) -> anyhow::Result<JobResult> {
            Ok(JobResult {
                job_id: job.id,
                node_id: job.node_id,
                execution_id: job.execution_id,
                success: true,
                output: Some(serde_json::json!({"ok": true})),
                error: None,
                duration_ms: 1,
                cached: false,
            })
        }
    }

    /// Fails `failures` times, then succeeds
    struct FlakyProcessor {
        failures: AtomicU32,
    }

    #[async_trait]
    impl JobProcessor for FlakyProcessor {
        async fn process(&self, job: NodeJob) -> anyhow::Result<JobResult> {
            let remaining = self.failures.load(Ordering::SeqCst);
            let success = remaining == 0;
            if !success {
                self.failures.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(JobResult {
                job_id: job.id,
                node_id: job.node_id,
                execution_id: job.execution_id,
                success,
                output: success.then(|| serde_json::json!({"ok": true})),
                error: (!success).then(|| "transient".to_string()),
                duration_ms: 1,
                cached: false,
            })
        }
    }

    struct Collector {
        results: Mutex<Vec<JobResult>>,
    }

    #[async_trait]
    impl CompletionHandler for Collector {
        async fn on_job_completed(&self, result: JobResult) {
            self.results.lock().await.push(result);
        }
    }

    #[tokio::test]
    async fn test_worker_requires_processor() {
        let queue = JobQueue::new("test");
        assert!(matches!(
            queue.start_worker().await,
            Err(EngineError::Queue(_))
        ));
    }

    #[tokio::test]
    async fn test_fifo_completion_order() {
        let queue = JobQueue::new("test");
        let collector = Arc::new(Collector {
            results: Mutex::new(Vec::new()),
        });

        queue.set_processor(Arc::new(OkProcessor)).await;
        queue.on_completed(collector.clone()).await;

        queue.add(job("j1", "exec-1")).await;
        queue.add(job("j2", "exec-1")).await;
        queue.start_worker().await.expect("start");
        queue.drain().await;

        let results = collector.results.lock().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].job_id, "j1");
        assert_eq!(results[1].job_id, "j2");
        assert!(results.iter().all(|r| r.success));

        queue.stop_worker().await;
    }

    #[tokio::test]
    async fn test_retries_then_succeeds_with_single_notification() {
        let queue = JobQueue::new("test");
        let collector = Arc::new(Collector {
            results: Mutex::new(Vec::new()),
        });

        queue
            .set_processor(Arc::new(FlakyProcessor {
                failures: AtomicU32::new(2),
            }))
            .await;
        queue.on_completed(collector.clone()).await;

        queue.add(job("j1", "exec-1")).await;
        queue.start_worker().await.expect("start");
        queue.drain().await;

        let results = collector.results.lock().await;
        assert_eq!(results.len(), 1, "retries must not notify completion");
        assert!(results[0].success);

        let stored = queue.get_job("j1").await.expect("job");
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.retry_count, 2);

        queue.stop_worker().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_notify_failure() {
        let queue = JobQueue::new("test");
        let collector = Arc::new(Collector {
            results: Mutex::new(Vec::new()),
        });

        queue
            .set_processor(Arc::new(FlakyProcessor {
                failures: AtomicU32::new(10),
            }))
            .await;
        queue.on_completed(collector.clone()).await;

        queue.add(job("j1", "exec-1")).await;
        queue.start_worker().await.expect("start");
        queue.drain().await;

        let results = collector.results.lock().await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);

        let stored = queue.get_job("j1").await.expect("job");
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.retry_count, 2);

        queue.stop_worker().await;
    }

    #[tokio::test]
    async fn test_cancel_pending_job_removes_from_queue() {
        let queue = JobQueue::new("test");

        queue.add(job("j1", "exec-1")).await;
        queue.add(job("j2", "exec-1")).await;

        assert!(queue.cancel_job("j1").await);
        assert_eq!(queue.pending_count().await, 1);

        // Already cancelled: no-op
        assert!(!queue.cancel_job("j1").await);

        let stored = queue.get_job("j1").await.expect("job");
        assert_eq!(stored.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_execution_bulk() {
        let queue = JobQueue::new("test");

        queue.add(job("j1", "exec-1")).await;
        queue.add(job("j2", "exec-1")).await;
        queue.add(job("j3", "exec-2")).await;

        assert_eq!(queue.cancel_execution("exec-1").await, 2);
        assert_eq!(queue.pending_count().await, 1);
    }
}
