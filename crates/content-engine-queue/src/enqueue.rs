//! Control-plane operations: ingest, schedule, fire, cancel, sync and the
//! read-only status views.
//!
//! Each operation is a free function over an open [`UnitOfWork`] and an
//! explicit `now`, so one call is one transaction. [`Enqueuer`] wraps them for
//! callers that just hold a [`Store`].

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    FIRE_PRIORITY, JobId, JobRecord, JobStatus, JobType, NewJob, Platform, PostId, PostStatus,
    QueueError, Store, UnitOfWork,
};

/// Characters of content shown in scheduled-list previews.
const PREVIEW_CHARS: usize = 100;

/// Short content fingerprint: the first 16 hex digits of SHA-256.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// The key a source file is tracked under, normalized lexically.
///
/// `./posts/a.md` and `posts/x/../a.md` both key as `posts/a.md`. Symlinks
/// are not resolved and relative paths stay relative.
pub fn source_key(source_file: &str) -> String {
    let mut normal = PathBuf::new();
    for component in Path::new(source_file).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normal.components().next_back() {
                Some(Component::Normal(_)) => {
                    normal.pop();
                }
                // Nothing above the root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normal.push(".."),
            },
            other => normal.push(other),
        }
    }
    if normal.as_os_str().is_empty() {
        return source_file.to_string();
    }
    normal.display().to_string()
}

/// Parse a schedule time: RFC 3339, or a naive ISO 8601 date-time taken as UTC.
pub fn parse_schedule_time(text: &str) -> Result<DateTime<Utc>, QueueError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            QueueError::Validation(format!(
                "Invalid datetime format: {}. Use ISO format.",
                text
            ))
        })
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A new Approved post.
    Created {
        post_id: PostId,
        platform: Platform,
        content_hash: String,
        source_file: Option<String>,
    },
    /// The post behind an active job for the same source file got the new content.
    Updated {
        post_id: PostId,
        job_id: JobId,
        content_hash: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Scheduled {
        job_id: JobId,
        post_id: PostId,
        scheduled_at: DateTime<Utc>,
        platform: Platform,
    },
    Rescheduled {
        job_id: JobId,
        post_id: PostId,
        scheduled_at: DateTime<Utc>,
    },
}

impl ScheduleOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            ScheduleOutcome::Scheduled { job_id, .. } | ScheduleOutcome::Rescheduled { job_id, .. } => {
                *job_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FireOutcome {
    QueuedImmediate { job_id: JobId, post_id: PostId },
}

/// What to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelTarget {
    Job(JobId),
    /// Every pending job of the post.
    Post(PostId),
}

impl CancelTarget {
    /// Build a target from optional ids, preferring the job id.
    pub fn from_ids(job_id: Option<JobId>, post_id: Option<PostId>) -> Result<Self, QueueError> {
        match (job_id, post_id) {
            (Some(job_id), _) => Ok(CancelTarget::Job(job_id)),
            (None, Some(post_id)) => Ok(CancelTarget::Post(post_id)),
            (None, None) => Err(QueueError::Validation(
                "Must provide either job_id or post_id".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// One job cancelled by id.
    #[serde(rename = "cancelled")]
    CancelledJob { job_id: JobId, post_id: PostId },
    /// Every pending job of a post cancelled.
    #[serde(rename = "cancelled")]
    CancelledPost {
        cancelled_jobs: Vec<JobId>,
        post_id: PostId,
    },
    /// The post had no pending jobs.
    #[serde(rename = "none")]
    NothingPending { post_id: PostId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncOutcome {
    NotFound {
        source_file: String,
    },
    Unchanged {
        job_id: JobId,
        post_id: PostId,
    },
    Updated {
        job_id: JobId,
        post_id: PostId,
        old_hash: Option<String>,
        new_hash: String,
    },
}

/// Status of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub post_id: PostId,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobStatusView {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            status: job.status,
            post_id: job.post_id,
            scheduled_at: job.scheduled_at,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error.clone(),
            next_retry_at: job.next_retry_at,
            created_at: job.created_at,
        }
    }
}

/// One line of a post's job history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostJobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Status of one post and every job it ever had.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostStatusView {
    pub post_id: PostId,
    pub post_status: PostStatus,
    pub platform: Platform,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub jobs: Vec<PostJobSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusView {
    Job(JobStatusView),
    Post(PostStatusView),
}

/// A pending job as shown by `list_pending`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEntry {
    pub job_id: JobId,
    pub post_id: PostId,
    pub job_type: JobType,
    /// RFC 3339 time, or `"immediate"`.
    pub scheduled_at: String,
    pub priority: i64,
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingList {
    pub count: usize,
    pub jobs: Vec<PendingEntry>,
}

/// A scheduled job as shown by `list_scheduled`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledEntry {
    pub job_id: JobId,
    pub post_id: PostId,
    pub platform: Platform,
    pub scheduled_at: DateTime<Utc>,
    pub content_preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledList {
    pub days_ahead: i64,
    pub count: usize,
    pub scheduled: Vec<ScheduledEntry>,
}

// =============================================================================
// Operations
// =============================================================================

/// Create an Approved post, or refresh the post behind an active job that was
/// ingested from the same `source_file`.
pub fn ingest(
    uow: &UnitOfWork<'_>,
    content: &str,
    platform: Platform,
    source_file: Option<&str>,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, QueueError> {
    let source_file = source_file.map(source_key);
    let source_file = source_file.as_deref();
    let hash = content_hash(content);

    let existing = match source_file {
        Some(path) => uow.find_active_by_source_file(path)?,
        None => None,
    };

    if let Some(mut job) = existing {
        let mut post = uow.require_post(job.post_id)?;
        post.content = content.to_string();
        post.updated_at = now;
        uow.update_post(&post)?;

        job.source_hash = Some(hash.clone());
        job.updated_at = now;
        uow.update_job(&job)?;

        info!(post_id = %post.id, job_id = %job.id, source_file = ?source_file, "updated ingested post");
        return Ok(IngestOutcome::Updated {
            post_id: post.id,
            job_id: job.id,
            content_hash: hash,
        });
    }

    let post = uow.insert_post(content, platform, PostStatus::Approved, now)?;
    info!(post_id = %post.id, %platform, "ingested new post");

    Ok(IngestOutcome::Created {
        post_id: post.id,
        platform,
        content_hash: hash,
        source_file: source_file.map(str::to_string),
    })
}

/// Schedule a post for `when`, reusing its active job if it has one.
pub fn schedule(
    uow: &UnitOfWork<'_>,
    post_id: PostId,
    when: DateTime<Utc>,
    priority: i64,
    source_file: Option<&str>,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<ScheduleOutcome, QueueError> {
    let source_file = source_file.map(source_key);
    let source_file = source_file.as_deref();
    let mut post = uow.require_post(post_id)?;
    let active = uow.find_active_by_post(post_id)?;

    let schedulable = matches!(post.status, PostStatus::Approved | PostStatus::Draft)
        || (post.status == PostStatus::Scheduled && active.is_some());
    if !schedulable {
        return Err(QueueError::Validation(format!(
            "Post must be APPROVED or DRAFT, got {}",
            post.status
        )));
    }
    if when <= now {
        return Err(QueueError::Validation(
            "Scheduled time must be in the future".to_string(),
        ));
    }

    let hash = content_hash(&post.content);

    let outcome = match active {
        Some(mut job) => {
            job.scheduled_at = Some(when);
            job.priority = priority;
            job.source_hash = Some(hash);
            if let Some(path) = source_file {
                job.source_file = Some(path.to_string());
            }
            job.updated_at = now;
            uow.update_job(&job)?;

            info!(job_id = %job.id, %post_id, scheduled_at = %when, "rescheduled job");
            ScheduleOutcome::Rescheduled {
                job_id: job.id,
                post_id,
                scheduled_at: when,
            }
        }
        None => {
            let job = uow.insert_job(
                &NewJob {
                    job_type: JobType::for_platform(post.platform),
                    post_id,
                    scheduled_at: Some(when),
                    priority,
                    max_attempts,
                    source_file: source_file.map(str::to_string),
                    source_hash: Some(hash),
                },
                now,
            )?;

            info!(job_id = %job.id, %post_id, scheduled_at = %when, "scheduled job");
            ScheduleOutcome::Scheduled {
                job_id: job.id,
                post_id,
                scheduled_at: when,
                platform: post.platform,
            }
        }
    };

    post.status = PostStatus::Scheduled;
    post.scheduled_at = Some(when);
    post.updated_at = now;
    uow.update_post(&post)?;

    Ok(outcome)
}

/// Queue a post for immediate publishing at the highest priority.
///
/// Always inserts a new job, even if the post already has an active one.
pub fn fire(
    uow: &UnitOfWork<'_>,
    post_id: PostId,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<FireOutcome, QueueError> {
    let mut post = uow.require_post(post_id)?;

    let mut new_job = NewJob::new(post_id, post.platform);
    new_job.priority = FIRE_PRIORITY;
    new_job.max_attempts = max_attempts;
    let job = uow.insert_job(&new_job, now)?;

    post.status = PostStatus::Scheduled;
    post.updated_at = now;
    uow.update_post(&post)?;

    info!(job_id = %job.id, %post_id, "queued immediate job");
    Ok(FireOutcome::QueuedImmediate {
        job_id: job.id,
        post_id,
    })
}

/// Cancel a pending job, or every pending job of a post.
///
/// Once no active job is left for the post, it reverts to Approved with its
/// schedule cleared.
pub fn cancel(
    uow: &UnitOfWork<'_>,
    target: CancelTarget,
    now: DateTime<Utc>,
) -> Result<CancelOutcome, QueueError> {
    match target {
        CancelTarget::Job(job_id) => {
            let mut job = uow.require_job(job_id)?;
            if job.status != JobStatus::Pending {
                return Err(QueueError::Validation(format!(
                    "Can only cancel PENDING jobs, got {}",
                    job.status
                )));
            }
            job.transition(JobStatus::Cancelled, now)?;
            uow.update_job(&job)?;
            revert_post_if_idle(uow, job.post_id, now)?;

            info!(%job_id, post_id = %job.post_id, "cancelled job");
            Ok(CancelOutcome::CancelledJob {
                job_id,
                post_id: job.post_id,
            })
        }
        CancelTarget::Post(post_id) => {
            let jobs = uow.find_pending_by_post(post_id)?;
            if jobs.is_empty() {
                return Ok(CancelOutcome::NothingPending { post_id });
            }

            let mut cancelled = Vec::with_capacity(jobs.len());
            for mut job in jobs {
                job.transition(JobStatus::Cancelled, now)?;
                uow.update_job(&job)?;
                cancelled.push(job.id);
            }
            revert_post_if_idle(uow, post_id, now)?;

            info!(%post_id, count = cancelled.len(), "cancelled pending jobs for post");
            Ok(CancelOutcome::CancelledPost {
                cancelled_jobs: cancelled,
                post_id,
            })
        }
    }
}

fn revert_post_if_idle(
    uow: &UnitOfWork<'_>,
    post_id: PostId,
    now: DateTime<Utc>,
) -> Result<(), QueueError> {
    // Another pending or in-flight job still speaks for the post
    if uow.find_active_by_post(post_id)?.is_some() {
        return Ok(());
    }
    if let Some(mut post) = uow.get_post(post_id)? {
        post.status = PostStatus::Approved;
        post.scheduled_at = None;
        post.updated_at = now;
        uow.update_post(&post)?;
    }
    Ok(())
}

/// Push edited source content into the post of the active job for `source_file`.
///
/// Identical content is a no-op. A real change updates the post and the job's
/// hash but leaves its schedule and attempt count alone.
pub fn sync(
    uow: &UnitOfWork<'_>,
    source_file: &str,
    content: &str,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, QueueError> {
    let source_file = source_key(source_file);
    let source_file = source_file.as_str();
    let new_hash = content_hash(content);

    let Some(mut job) = uow.find_active_by_source_file(source_file)? else {
        return Ok(SyncOutcome::NotFound {
            source_file: source_file.to_string(),
        });
    };

    if job.source_hash.as_deref() == Some(new_hash.as_str()) {
        return Ok(SyncOutcome::Unchanged {
            job_id: job.id,
            post_id: job.post_id,
        });
    }

    let mut post = uow.require_post(job.post_id)?;
    post.content = content.to_string();
    post.updated_at = now;
    uow.update_post(&post)?;

    let old_hash = job.source_hash.replace(new_hash.clone());
    job.updated_at = now;
    uow.update_job(&job)?;

    info!(job_id = %job.id, post_id = %job.post_id, source_file, "synced post from source file");
    Ok(SyncOutcome::Updated {
        job_id: job.id,
        post_id: job.post_id,
        old_hash,
        new_hash,
    })
}

/// Status of a job, or of a post and its jobs.
pub fn status(
    uow: &UnitOfWork<'_>,
    job_id: Option<JobId>,
    post_id: Option<PostId>,
) -> Result<StatusView, QueueError> {
    match (job_id, post_id) {
        (Some(job_id), _) => {
            let job = uow.require_job(job_id)?;
            Ok(StatusView::Job(JobStatusView::from(&job)))
        }
        (None, Some(post_id)) => {
            let post = uow.require_post(post_id)?;
            let jobs = uow
                .find_by_post(post_id)?
                .iter()
                .map(|j| PostJobSummary {
                    job_id: j.id,
                    status: j.status,
                    scheduled_at: j.scheduled_at,
                })
                .collect();
            Ok(StatusView::Post(PostStatusView {
                post_id: post.id,
                post_status: post.status,
                platform: post.platform,
                scheduled_at: post.scheduled_at,
                posted_at: post.posted_at,
                external_id: post.external_id,
                error_message: post.error_message,
                jobs,
            }))
        }
        (None, None) => Err(QueueError::Validation(
            "Must provide either job_id or post_id".to_string(),
        )),
    }
}

/// Pending jobs in the order the worker would run them.
pub fn list_pending(uow: &UnitOfWork<'_>, limit: usize) -> Result<PendingList, QueueError> {
    let jobs: Vec<PendingEntry> = uow
        .list_pending(limit)?
        .into_iter()
        .map(|j| PendingEntry {
            job_id: j.id,
            post_id: j.post_id,
            job_type: j.job_type,
            scheduled_at: j
                .scheduled_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "immediate".to_string()),
            priority: j.priority,
            source_file: j.source_file,
        })
        .collect();

    Ok(PendingList {
        count: jobs.len(),
        jobs,
    })
}

/// Pending jobs scheduled within the next `days_ahead` days.
pub fn list_scheduled(
    uow: &UnitOfWork<'_>,
    days_ahead: i64,
    now: DateTime<Utc>,
) -> Result<ScheduledList, QueueError> {
    if days_ahead < 0 {
        return Err(QueueError::Validation(format!(
            "days_ahead must not be negative, got {}",
            days_ahead
        )));
    }
    let until = Duration::try_days(days_ahead)
        .and_then(|window| now.checked_add_signed(window))
        .ok_or_else(|| {
            QueueError::Validation(format!("days_ahead is out of range: {}", days_ahead))
        })?;
    let mut scheduled = Vec::new();

    for job in uow.list_scheduled(until)? {
        let Some(scheduled_at) = job.scheduled_at else {
            continue;
        };
        let post = uow.require_post(job.post_id)?;
        scheduled.push(ScheduledEntry {
            job_id: job.id,
            post_id: job.post_id,
            platform: post.platform,
            scheduled_at,
            content_preview: preview(&post.content),
        });
    }

    Ok(ScheduledList {
        days_ahead,
        count: scheduled.len(),
        scheduled,
    })
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

// =============================================================================
// Enqueuer
// =============================================================================

/// Store-owning front end for the control-plane operations.
///
/// Every method is one unit of work stamped with the current time.
#[derive(Clone)]
pub struct Enqueuer {
    store: Arc<Store>,
    max_attempts: u32,
}

impl Enqueuer {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Attempt budget given to jobs this enqueuer creates.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[tracing::instrument(skip(self, content), fields(len = content.len()))]
    pub fn ingest(
        &self,
        content: &str,
        platform: Platform,
        source_file: Option<&str>,
    ) -> Result<IngestOutcome, QueueError> {
        self.store
            .unit_of_work(|uow| ingest(uow, content, platform, source_file, Utc::now()))
    }

    #[tracing::instrument(skip(self))]
    pub fn schedule(
        &self,
        post_id: PostId,
        when: DateTime<Utc>,
        priority: i64,
        source_file: Option<&str>,
    ) -> Result<ScheduleOutcome, QueueError> {
        self.store.unit_of_work(|uow| {
            schedule(
                uow,
                post_id,
                when,
                priority,
                source_file,
                self.max_attempts,
                Utc::now(),
            )
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn fire(&self, post_id: PostId) -> Result<FireOutcome, QueueError> {
        self.store
            .unit_of_work(|uow| fire(uow, post_id, self.max_attempts, Utc::now()))
    }

    #[tracing::instrument(skip(self))]
    pub fn cancel(&self, target: CancelTarget) -> Result<CancelOutcome, QueueError> {
        self.store
            .unit_of_work(|uow| cancel(uow, target, Utc::now()))
    }

    #[tracing::instrument(skip(self, content), fields(len = content.len()))]
    pub fn sync(&self, source_file: &str, content: &str) -> Result<SyncOutcome, QueueError> {
        self.store
            .unit_of_work(|uow| sync(uow, source_file, content, Utc::now()))
    }

    pub fn status(
        &self,
        job_id: Option<JobId>,
        post_id: Option<PostId>,
    ) -> Result<StatusView, QueueError> {
        self.store.unit_of_work(|uow| status(uow, job_id, post_id))
    }

    pub fn list_pending(&self, limit: usize) -> Result<PendingList, QueueError> {
        self.store.unit_of_work(|uow| list_pending(uow, limit))
    }

    pub fn list_scheduled(&self, days_ahead: i64) -> Result<ScheduledList, QueueError> {
        self.store
            .unit_of_work(|uow| list_scheduled(uow, days_ahead, Utc::now()))
    }
}
