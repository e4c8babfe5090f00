//! Queue types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::QueueError;

/// Priority given to jobs created by `fire`.
pub const FIRE_PRIORITY: i64 = 100;

/// Default number of publish attempts before a job fails terminally.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Row id of a job in the `job_queue` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

/// Row id of a post in the `posts` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates `as_str`, `Display` and `FromStr` for a fieldless enum stored as text.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// All variants, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// The stored and serialized name of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = QueueError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(QueueError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

/// Social platform a post targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[serde(rename = "linkedin")]
    LinkedIn,
    Twitter,
    Blog,
}

text_enum!(Platform {
    LinkedIn => "linkedin",
    Twitter => "twitter",
    Blog => "blog",
});

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[serde(rename = "post_to_linkedin")]
    PublishToLinkedIn,
    #[serde(rename = "post_to_twitter")]
    PublishToTwitter,
    #[serde(rename = "post_to_blog")]
    PublishToBlog,
}

text_enum!(JobType {
    PublishToLinkedIn => "post_to_linkedin",
    PublishToTwitter => "post_to_twitter",
    PublishToBlog => "post_to_blog",
});

impl JobType {
    /// The job type that publishes to `platform`.
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::LinkedIn => JobType::PublishToLinkedIn,
            Platform::Twitter => JobType::PublishToTwitter,
            Platform::Blog => JobType::PublishToBlog,
        }
    }

    /// The platform this job type publishes to.
    pub fn platform(&self) -> Platform {
        match self {
            JobType::PublishToLinkedIn => Platform::LinkedIn,
            JobType::PublishToTwitter => Platform::Twitter,
            JobType::PublishToBlog => Platform::Blog,
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to become due (or waiting out a retry delay).
    #[default]
    Pending,
    /// Claimed by the worker, publish in flight.
    Processing,
    /// Published.
    Completed,
    /// Retries exhausted, or the failure was not retryable.
    Failed,
    /// Cancelled before it ran.
    Cancelled,
}

text_enum!(JobStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl JobStatus {
    /// Pending and Processing jobs count against the one-active-job-per-post rule.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is one of the lifecycle edges.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Pending)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

/// Lifecycle state of a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Draft,
    Approved,
    Scheduled,
    Posted,
    Failed,
    Rejected,
}

text_enum!(PostStatus {
    Draft => "draft",
    Approved => "approved",
    Scheduled => "scheduled",
    Posted => "posted",
    Failed => "failed",
    Rejected => "rejected",
});

/// A persisted unit of publish work tied to one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub post_id: PostId,
    /// `None` means due immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Higher runs first.
    pub priority: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// File the post content was ingested from, for edit-after-ingest tracking.
    pub source_file: Option<String>,
    /// Hash of the content last associated with `source_file`.
    pub source_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Whether the worker should pick this job up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.scheduled_at.is_none_or(|at| at <= now)
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Move to `next`, rejecting anything that is not a lifecycle edge.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Fields for inserting a job. The store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub post_id: PostId,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub priority: i64,
    pub max_attempts: u32,
    pub source_file: Option<String>,
    pub source_hash: Option<String>,
}

impl NewJob {
    /// A pending job publishing `post_id` to `platform`.
    pub fn new(post_id: PostId, platform: Platform) -> Self {
        Self {
            job_type: JobType::for_platform(platform),
            post_id,
            scheduled_at: None,
            priority: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            source_file: None,
            source_hash: None,
        }
    }
}

/// A piece of content headed for one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub content: String,
    pub platform: Platform,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Platform-assigned id, set once published.
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored credentials for one platform.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Platform user identifier (the LinkedIn member `sub`).
    pub user_sub: Option<String>,
    pub user_email: Option<String>,
}

// Tokens stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("platform", &self.platform)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user_sub", &self.user_sub)
            .finish_non_exhaustive()
    }
}
