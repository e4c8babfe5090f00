//! Durable publish queue for Content Engine.
//!
//! This crate provides a single-process, SQLite-backed job queue that:
//! - Schedules future publish actions for posts
//! - Keeps at most one active job per post
//! - Retries transient publish failures on a fixed backoff schedule
//! - Tracks the source file a post was ingested from, so edits can be synced

mod enqueue;
mod error;
mod publisher;
mod retry;
pub mod schema;
mod store;
mod types;
mod worker;

pub use enqueue::{
    CancelOutcome, CancelTarget, Enqueuer, FireOutcome, IngestOutcome, JobStatusView,
    PendingEntry, PendingList, PostJobSummary, PostStatusView, ScheduleOutcome, ScheduledEntry,
    ScheduledList, StatusView, SyncOutcome, content_hash, parse_schedule_time, source_key,
};
pub use error::QueueError;
pub use publisher::{PublishError, Publisher, PublisherRegistry};
pub use retry::{
    RETRY_BACKOFF_SECS, RetryDecision, RetryPolicy, exhausted_message, permanent_failure_message,
};
pub use store::{Store, UnitOfWork};
pub use types::{
    Credentials, DEFAULT_MAX_ATTEMPTS, FIRE_PRIORITY, JobId, JobRecord, JobStatus, JobType,
    NewJob, Platform, Post, PostId, PostStatus,
};
pub use worker::{Clock, CycleReport, DEFAULT_POLL_INTERVAL_SECS, Worker, WorkerConfig};

/// Control-plane operations over an explicit unit of work.
pub mod ops {
    pub use crate::enqueue::{
        cancel, fire, ingest, list_pending, list_scheduled, schedule, status, sync,
    };
}
