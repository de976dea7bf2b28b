/// Batch job processor
///
/// One coordinating loop takes a bounded batch of pending sync jobs, runs
/// them concurrently with a hard per-job timeout and records the outcome.
/// A timed-out job's task is abandoned, not aborted; its late writes go
/// through the idempotent ingest path.
use crate::{
    error::{LinkError, LinkResult},
    metrics,
    models::SyncJob,
    store::EntityStore,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

pub mod queue;
pub mod tasks;

pub use queue::{JobQueue, SqliteJobQueue};
pub use tasks::{SyncPipeline, SyncReport};

/// The work a sync job performs for one user
#[async_trait]
pub trait UserSync: Send + Sync {
    async fn sync_user(&self, user_id: &str) -> LinkResult<SyncReport>;
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    /// Re-seed one job per user whenever the queue runs dry
    pub continuous: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            job_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            continuous: false,
        }
    }
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs enqueued because the batch was empty
    pub reseeded: usize,
    pub duration: Duration,
}

pub struct JobProcessor {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn EntityStore>,
    sync: Arc<dyn UserSync>,
    config: ProcessorConfig,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn EntityStore>,
        sync: Arc<dyn UserSync>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            store,
            sync,
            config,
        }
    }

    /// Poll until `shutdown` flips to true or its sender goes away
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            timeout_secs = self.config.job_timeout.as_secs(),
            continuous = self.config.continuous,
            "Starting job processor"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_batch().await {
                error!("Job batch failed: {}", e);
            }
            match self.queue.pending_count().await {
                Ok(count) => metrics::set_pending_jobs(count),
                Err(e) => warn!("Failed to count pending jobs: {}", e),
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Job processor stopped");
    }

    /// Run one iteration: process a batch, or re-seed when there is none
    pub async fn run_batch(&self) -> LinkResult<BatchReport> {
        let started = Instant::now();
        let jobs = self.queue.dequeue(self.config.batch_size).await?;

        if jobs.is_empty() {
            let reseeded = if self.config.continuous {
                self.reseed().await?
            } else {
                0
            };
            return Ok(BatchReport {
                reseeded,
                duration: started.elapsed(),
                ..BatchReport::default()
            });
        }

        let results = join_all(jobs.iter().map(|job| self.run_job(job))).await;

        let mut report = BatchReport {
            processed: jobs.len(),
            ..BatchReport::default()
        };
        let mut total_job_time = Duration::ZERO;
        for (succeeded, elapsed) in results {
            total_job_time += elapsed;
            if succeeded {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        report.duration = started.elapsed();

        info!(
            processed = report.processed,
            success = report.succeeded,
            errors = report.failed,
            batch_ms = report.duration.as_millis() as u64,
            avg_job_ms = (total_job_time / report.processed as u32).as_millis() as u64,
            "Processed sync batch"
        );

        Ok(report)
    }

    /// Enqueue one job per known user; users with a pending job are skipped
    pub async fn reseed(&self) -> LinkResult<usize> {
        let mut enqueued = 0;
        for user_id in self.store.list_user_ids().await? {
            if self.queue.enqueue(&user_id).await? {
                enqueued += 1;
            }
        }

        if enqueued > 0 {
            info!("Queue empty, enqueued {} sync jobs", enqueued);
        }
        Ok(enqueued)
    }

    /// Race one job against the timeout and settle it in the queue
    async fn run_job(&self, job: &SyncJob) -> (bool, Duration) {
        let started = Instant::now();
        let sync = Arc::clone(&self.sync);
        let user_id = job.user_id.clone();

        // Dropping the handle on timeout detaches the task
        let handle = tokio::spawn(async move { sync.sync_user(&user_id).await });
        let result = match timeout(self.config.job_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(LinkError::Internal(format!("Sync task failed: {}", join_error))),
            Err(_) => Err(LinkError::Timeout(self.config.job_timeout)),
        };
        let elapsed = started.elapsed();

        let succeeded = match result {
            Ok(report) => {
                debug!(job_id = %job.id, user_id = %job.user_id, ?report, "Sync job completed");
                if let Err(e) = self.queue.mark_completed(job.id).await {
                    error!(job_id = %job.id, "Failed to mark job completed: {}", e);
                }
                true
            }
            Err(e) => {
                warn!(job_id = %job.id, user_id = %job.user_id, error = %e, "Sync job failed");
                if let Err(mark_err) = self.queue.mark_failed(job.id, &e.to_string()).await {
                    error!(job_id = %job.id, "Failed to mark job failed: {}", mark_err);
                }
                false
            }
        };

        metrics::record_sync_job(if succeeded { "completed" } else { "failed" }, elapsed.as_secs_f64());
        (succeeded, elapsed)
    }
}
