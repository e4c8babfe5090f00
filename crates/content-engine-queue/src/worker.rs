//! Worker poller: drains due jobs, publishes them and applies the retry policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::retry::{exhausted_message, permanent_failure_message};
use crate::{
    JobId, JobRecord, JobStatus, PostStatus, PublishError, PublisherRegistry, QueueError,
    RetryDecision, RetryPolicy, Store,
};

/// Default seconds between queue checks in continuous mode.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Mark jobs published without calling any publisher.
    pub dry_run: bool,
    /// Sleep between cycles in continuous mode.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

/// Counts for one pass over the due jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Jobs claimed this cycle.
    pub processed: usize,
    pub completed: usize,
    /// Failed attempts put back to pending with a backoff.
    pub retried: usize,
    /// Jobs that failed terminally.
    pub failed: usize,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.processed == 0
    }
}

/// How one job ended up after its attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum JobOutcome {
    Completed { external_id: String },
    Retrying { next_retry_at: DateTime<Utc> },
    Failed,
    /// Changed status between the snapshot and the claim (cancelled, usually).
    Skipped,
}

/// A failed attempt: the message recorded on the job and whether to retry.
#[derive(Debug)]
struct AttemptFailure {
    message: String,
    retryable: bool,
}

impl From<PublishError> for AttemptFailure {
    fn from(e: PublishError) -> Self {
        Self {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

impl From<QueueError> for AttemptFailure {
    fn from(e: QueueError) -> Self {
        Self {
            message: e.to_string(),
            retryable: true,
        }
    }
}

/// Source of the current time. Outcomes are stamped with a fresh read.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Polls the store for due jobs and publishes them one at a time.
pub struct Worker {
    store: Arc<Store>,
    registry: PublisherRegistry,
    policy: RetryPolicy,
    config: WorkerConfig,
    clock: Clock,
}

impl Worker {
    pub fn new(store: Arc<Store>, registry: PublisherRegistry, config: WorkerConfig) -> Self {
        Self {
            store,
            registry,
            policy: RetryPolicy::default(),
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the default retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the wall clock used to stamp claims and outcomes.
    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Process every job due right now.
    pub async fn process_queue(&self) -> Result<CycleReport, QueueError> {
        self.process_queue_at(self.now()).await
    }

    /// Process every job due at `now`, in priority then schedule order.
    ///
    /// `now` only picks the due snapshot. Each claim and outcome is stamped
    /// with the worker's clock at the moment it is written.
    ///
    /// Only reading the snapshot can fail the cycle. A failure while handling
    /// one job is logged and the cycle moves on to the next.
    #[tracing::instrument(skip(self), fields(dry_run = self.config.dry_run))]
    pub async fn process_queue_at(&self, now: DateTime<Utc>) -> Result<CycleReport, QueueError> {
        let due = self.store.unit_of_work(|uow| uow.find_due(now))?;
        let mut report = CycleReport::default();

        if due.is_empty() {
            debug!("no jobs to process");
            return Ok(report);
        }
        info!(count = due.len(), "found due jobs");

        for job in due {
            let job_id = job.id;
            match self.process_job(job).await {
                Ok(JobOutcome::Completed { external_id }) => {
                    report.processed += 1;
                    report.completed += 1;
                    info!(%job_id, %external_id, "job completed");
                }
                Ok(JobOutcome::Retrying { next_retry_at }) => {
                    report.processed += 1;
                    report.retried += 1;
                    debug!(%job_id, %next_retry_at, "job will retry");
                }
                Ok(JobOutcome::Failed) => {
                    report.processed += 1;
                    report.failed += 1;
                }
                Ok(JobOutcome::Skipped) => {
                    debug!(%job_id, "job no longer pending, skipped");
                }
                Err(e) => {
                    error!(%job_id, error = %e, "failed to process job");
                }
            }
        }

        Ok(report)
    }

    async fn process_job(&self, job: JobRecord) -> Result<JobOutcome, QueueError> {
        let Some(job) = self.claim(job.id)? else {
            return Ok(JobOutcome::Skipped);
        };
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            post_id = %job.post_id,
            attempt = job.attempts,
            "processing job"
        );

        let failure = match self.attempt(&job).await {
            Ok(external_id) => match self.record_success(job.clone(), external_id) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "failed to record publish");
                    AttemptFailure::from(e)
                }
            },
            Err(failure) => failure,
        };

        match self.record_failure(job.clone(), &failure) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to record failure, releasing job");
                self.release(job.id, &failure.message)
            }
        }
    }

    /// Move a still-pending job to Processing and count the attempt.
    fn claim(&self, job_id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let now = self.now();
        self.store.unit_of_work(|uow| {
            let mut job = uow.require_job(job_id)?;
            if job.status != JobStatus::Pending {
                return Ok(None);
            }
            job.transition(JobStatus::Processing, now)?;
            job.started_at = Some(now);
            job.attempts += 1;
            uow.update_job(&job)?;
            Ok(Some(job))
        })
    }

    /// One publish attempt. No transaction is held while the publisher runs.
    async fn attempt(&self, job: &JobRecord) -> Result<String, AttemptFailure> {
        let platform = job.job_type.platform();

        if self.config.dry_run {
            let post = self.store.unit_of_work(|uow| uow.require_post(job.post_id))?;
            let preview: String = post.content.chars().take(100).collect();
            info!(job_id = %job.id, %platform, %preview, "dry run, not publishing");
            return Ok(format!("dry-run-{}", job.id));
        }

        let publisher = self.registry.get(platform)?;
        let (post, credentials) = self.store.unit_of_work(|uow| {
            let post = uow.require_post(job.post_id)?;
            let credentials = uow.get_credentials(platform)?;
            Ok::<_, QueueError>((post, credentials))
        })?;
        let credentials = credentials.ok_or(PublishError::MissingCredentials(platform))?;

        // Run the call on its own task so a panicking publisher fails this job
        // instead of the worker.
        let content = post.content;
        let handle =
            tokio::spawn(async move { publisher.publish(&content, &credentials).await });
        match handle.await {
            Ok(result) => Ok(result?),
            Err(join_error) => Err(AttemptFailure {
                message: format!("publisher task failed: {}", join_error),
                retryable: true,
            }),
        }
    }

    fn record_success(
        &self,
        mut job: JobRecord,
        external_id: String,
    ) -> Result<JobOutcome, QueueError> {
        let now = self.now();
        self.store.unit_of_work(|uow| {
            job.transition(JobStatus::Completed, now)?;
            job.completed_at = Some(now);
            job.last_error = None;
            job.next_retry_at = None;
            uow.update_job(&job)?;

            let mut post = uow.require_post(job.post_id)?;
            post.status = PostStatus::Posted;
            post.posted_at = Some(now);
            post.external_id = Some(external_id.clone());
            post.error_message = None;
            post.updated_at = now;
            uow.update_post(&post)?;

            Ok(JobOutcome::Completed { external_id })
        })
    }

    fn record_failure(
        &self,
        mut job: JobRecord,
        failure: &AttemptFailure,
    ) -> Result<JobOutcome, QueueError> {
        let now = self.now();
        let decision = self
            .policy
            .decide(job.attempts, job.max_attempts, failure.retryable, now);

        self.store.unit_of_work(|uow| {
            job.last_error = Some(failure.message.clone());

            match decision {
                RetryDecision::Retry {
                    delay,
                    next_retry_at,
                } => {
                    job.transition(JobStatus::Pending, now)?;
                    job.next_retry_at = Some(next_retry_at);
                    uow.update_job(&job)?;

                    warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        max_attempts = job.max_attempts,
                        retry_in_secs = delay.num_seconds(),
                        error = %failure.message,
                        "job failed, scheduled retry"
                    );
                    Ok(JobOutcome::Retrying { next_retry_at })
                }
                RetryDecision::GiveUp => {
                    job.transition(JobStatus::Failed, now)?;
                    uow.update_job(&job)?;

                    if let Some(mut post) = uow.get_post(job.post_id)? {
                        post.status = PostStatus::Failed;
                        post.error_message = Some(if failure.retryable {
                            exhausted_message(&failure.message)
                        } else {
                            permanent_failure_message(&failure.message)
                        });
                        post.updated_at = now;
                        uow.update_post(&post)?;
                    }

                    error!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        retryable = failure.retryable,
                        error = %failure.message,
                        "job failed permanently"
                    );
                    Ok(JobOutcome::Failed)
                }
            }
        })
    }

    /// Last resort for a claimed job whose outcome could not be written.
    ///
    /// Touches only the job row, re-read from the store. A job left in
    /// Processing is never picked up again.
    fn release(&self, job_id: JobId, message: &str) -> Result<JobOutcome, QueueError> {
        let now = self.now();
        self.store.unit_of_work(|uow| {
            let mut job = uow.require_job(job_id)?;
            if job.status != JobStatus::Processing {
                return Ok(JobOutcome::Skipped);
            }
            job.last_error = Some(message.to_string());

            let outcome = match self.policy.decide(job.attempts, job.max_attempts, true, now) {
                RetryDecision::Retry { next_retry_at, .. } => {
                    job.transition(JobStatus::Pending, now)?;
                    job.next_retry_at = Some(next_retry_at);
                    JobOutcome::Retrying { next_retry_at }
                }
                RetryDecision::GiveUp => {
                    job.transition(JobStatus::Failed, now)?;
                    JobOutcome::Failed
                }
            };
            uow.update_job(&job)?;
            Ok(outcome)
        })
    }

    /// Process the queue every poll interval until `shutdown_rx` reads true.
    pub async fn run_continuous(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            dry_run = self.config.dry_run,
            "worker starting"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.process_queue().await {
                Ok(report) if !report.is_empty() => {
                    info!(
                        processed = report.processed,
                        completed = report.completed,
                        retried = report.retried,
                        failed = report.failed,
                        "cycle finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "failed to read due jobs"),
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender can never signal again
                    if changed.is_err() {
                        break;
                    }
                    if *shutdown_rx.borrow() {
                        info!("worker received shutdown signal");
                    }
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        info!("worker shut down gracefully");
    }
}
