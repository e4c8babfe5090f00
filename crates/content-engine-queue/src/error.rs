//! Error types for the publish queue.

use thiserror::Error;

use crate::{JobId, JobStatus, PostId};

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Bad caller input. Surfaced to the caller and never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Post not found.
    #[error("post not found: {0}")]
    PostNotFound(PostId),

    /// A status change that is not one of the allowed lifecycle edges.
    #[error("invalid job transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl QueueError {
    /// Whether this error was caused by caller input rather than by the store.
    ///
    /// Missing jobs and posts count as validation failures for callers of the
    /// control-plane operations.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QueueError::Validation(_)
                | QueueError::JobNotFound(_)
                | QueueError::PostNotFound(_)
                | QueueError::InvalidTransition { .. }
        )
    }
}
