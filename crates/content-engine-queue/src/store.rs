//! SQLite-backed store for posts, jobs and platform credentials.
//!
//! All access goes through a [`UnitOfWork`]: one `BEGIN IMMEDIATE` transaction
//! handed to a closure. It commits when the closure returns `Ok` and rolls back
//! on every other exit path, so a failed operation never leaves partial writes.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use tracing::{debug, info};

use crate::schema;
use crate::{
    Credentials, JobId, JobRecord, JobStatus, JobType, NewJob, Platform, Post, PostId, PostStatus,
    QueueError,
};

const JOB_COLUMNS: &str = "id, job_type, status, post_id, scheduled_at, priority, attempts, \
     max_attempts, last_error, next_retry_at, started_at, completed_at, source_file, \
     source_hash, created_at, updated_at";

const POST_COLUMNS: &str = "id, content, platform, status, scheduled_at, posted_at, external_id, \
     error_message, created_at, updated_at";

/// Handle to the queue database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path` and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)?;

        // WAL lets CLI reads proceed while the worker writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;

        let version = schema::migrate(&mut conn)?;
        info!(path = %path.display(), version, "queue database initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one transaction.
    ///
    /// The transaction is taken with `BEGIN IMMEDIATE`, so concurrent writers
    /// against the same file queue up behind it instead of interleaving their
    /// reads and writes.
    pub fn unit_of_work<T, E>(
        &self,
        f: impl FnOnce(&UnitOfWork<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<QueueError>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(QueueError::from)?;
        let uow = UnitOfWork { tx };
        let value = f(&uow)?;
        uow.tx.commit().map_err(QueueError::from)?;
        Ok(value)
    }
}

/// An open transaction against the store.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl UnitOfWork<'_> {
    // =========================================================================
    // Posts
    // =========================================================================

    /// Insert a post and return it with its assigned id.
    pub fn insert_post(
        &self,
        content: &str,
        platform: Platform,
        status: PostStatus,
        now: DateTime<Utc>,
    ) -> Result<Post, QueueError> {
        self.tx.execute(
            "INSERT INTO posts (content, platform, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![content, platform, status, encode_ts(now)],
        )?;
        let id = PostId(self.tx.last_insert_rowid());
        debug!(post_id = %id, %platform, "inserted post");

        self.get_post(id)?.ok_or(QueueError::PostNotFound(id))
    }

    /// Get a post by id.
    pub fn get_post(&self, id: PostId) -> Result<Option<Post>, QueueError> {
        let post = self
            .tx
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                params![id],
                post_from_row,
            )
            .optional()?;
        Ok(post)
    }

    /// Get a post by id, failing if it does not exist.
    pub fn require_post(&self, id: PostId) -> Result<Post, QueueError> {
        self.get_post(id)?.ok_or(QueueError::PostNotFound(id))
    }

    /// Write every mutable field of `post` back to its row.
    pub fn update_post(&self, post: &Post) -> Result<(), QueueError> {
        let changed = self.tx.execute(
            "UPDATE posts SET content = ?2, platform = ?3, status = ?4, scheduled_at = ?5,
                 posted_at = ?6, external_id = ?7, error_message = ?8, updated_at = ?9
             WHERE id = ?1",
            params![
                post.id,
                post.content,
                post.platform,
                post.status,
                post.scheduled_at.map(encode_ts),
                post.posted_at.map(encode_ts),
                post.external_id,
                post.error_message,
                encode_ts(post.updated_at),
            ],
        )?;
        if changed == 0 {
            return Err(QueueError::PostNotFound(post.id));
        }
        Ok(())
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Insert a pending job and return it with its assigned id.
    pub fn insert_job(&self, job: &NewJob, now: DateTime<Utc>) -> Result<JobRecord, QueueError> {
        self.tx.execute(
            "INSERT INTO job_queue
             (job_type, status, post_id, scheduled_at, priority, attempts, max_attempts,
              source_file, source_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?9)",
            params![
                job.job_type,
                JobStatus::Pending,
                job.post_id,
                job.scheduled_at.map(encode_ts),
                job.priority,
                job.max_attempts,
                job.source_file,
                job.source_hash,
                encode_ts(now),
            ],
        )?;
        let id = JobId(self.tx.last_insert_rowid());
        debug!(job_id = %id, post_id = %job.post_id, job_type = %job.job_type, "inserted job");

        self.get_job(id)?.ok_or(QueueError::JobNotFound(id))
    }

    /// Get a job by id.
    pub fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let job = self
            .tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Get a job by id, failing if it does not exist.
    pub fn require_job(&self, id: JobId) -> Result<JobRecord, QueueError> {
        self.get_job(id)?.ok_or(QueueError::JobNotFound(id))
    }

    /// Write every mutable field of `job` back to its row.
    pub fn update_job(&self, job: &JobRecord) -> Result<(), QueueError> {
        let changed = self.tx.execute(
            "UPDATE job_queue SET job_type = ?2, status = ?3, scheduled_at = ?4, priority = ?5,
                 attempts = ?6, max_attempts = ?7, last_error = ?8, next_retry_at = ?9,
                 started_at = ?10, completed_at = ?11, source_file = ?12, source_hash = ?13,
                 updated_at = ?14
             WHERE id = ?1",
            params![
                job.id,
                job.job_type,
                job.status,
                job.scheduled_at.map(encode_ts),
                job.priority,
                job.attempts,
                job.max_attempts,
                job.last_error,
                job.next_retry_at.map(encode_ts),
                job.started_at.map(encode_ts),
                job.completed_at.map(encode_ts),
                job.source_file,
                job.source_hash,
                encode_ts(job.updated_at),
            ],
        )?;
        if changed == 0 {
            return Err(QueueError::JobNotFound(job.id));
        }
        Ok(())
    }

    /// Every job ever created for a post, oldest first.
    pub fn find_by_post(&self, post_id: PostId) -> Result<Vec<JobRecord>, QueueError> {
        self.query_jobs(
            &format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE post_id = ?1 ORDER BY id ASC"),
            params![post_id],
        )
    }

    /// The oldest pending or processing job for a post.
    pub fn find_active_by_post(&self, post_id: PostId) -> Result<Option<JobRecord>, QueueError> {
        let job = self
            .tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM job_queue
                     WHERE post_id = ?1 AND status IN (?2, ?3)
                     ORDER BY id ASC LIMIT 1"
                ),
                params![post_id, JobStatus::Pending, JobStatus::Processing],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// All pending jobs for a post, oldest first.
    pub fn find_pending_by_post(&self, post_id: PostId) -> Result<Vec<JobRecord>, QueueError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM job_queue
                 WHERE post_id = ?1 AND status = ?2 ORDER BY id ASC"
            ),
            params![post_id, JobStatus::Pending],
        )
    }

    /// The oldest pending or processing job ingested from `source_file`.
    pub fn find_active_by_source_file(
        &self,
        source_file: &str,
    ) -> Result<Option<JobRecord>, QueueError> {
        let job = self
            .tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM job_queue
                     WHERE source_file = ?1 AND status IN (?2, ?3)
                     ORDER BY id ASC LIMIT 1"
                ),
                params![source_file, JobStatus::Pending, JobStatus::Processing],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Pending jobs eligible to run at `now`: most urgent first, then earliest.
    ///
    /// Immediate jobs (no `scheduled_at`) sort ahead of scheduled ones of the
    /// same priority.
    pub fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, QueueError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM job_queue
                 WHERE status = ?1
                   AND (scheduled_at IS NULL OR scheduled_at <= ?2)
                   AND (next_retry_at IS NULL OR next_retry_at <= ?2)
                 ORDER BY priority DESC, scheduled_at ASC, id ASC"
            ),
            params![JobStatus::Pending, encode_ts(now)],
        )
    }

    /// Pending jobs in run order, due or not.
    pub fn list_pending(&self, limit: usize) -> Result<Vec<JobRecord>, QueueError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM job_queue
                 WHERE status = ?1
                 ORDER BY priority DESC, scheduled_at ASC, id ASC
                 LIMIT ?2"
            ),
            params![JobStatus::Pending, limit as i64],
        )
    }

    /// Pending jobs with a schedule no later than `until`, earliest first.
    pub fn list_scheduled(&self, until: DateTime<Utc>) -> Result<Vec<JobRecord>, QueueError> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM job_queue
                 WHERE status = ?1 AND scheduled_at IS NOT NULL AND scheduled_at <= ?2
                 ORDER BY scheduled_at ASC, id ASC"
            ),
            params![JobStatus::Pending, encode_ts(until)],
        )
    }

    fn query_jobs(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<JobRecord>, QueueError> {
        let mut stmt = self.tx.prepare(sql)?;
        let jobs = stmt
            .query_map(params, job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Stored credentials for `platform`, if any.
    pub fn get_credentials(&self, platform: Platform) -> Result<Option<Credentials>, QueueError> {
        let creds = self
            .tx
            .query_row(
                "SELECT platform, access_token, refresh_token, expires_at, user_sub, user_email
                 FROM oauth_tokens WHERE platform = ?1",
                params![platform],
                |row| {
                    Ok(Credentials {
                        platform: row.get(0)?,
                        access_token: row.get(1)?,
                        refresh_token: row.get(2)?,
                        expires_at: opt_ts_column(row, 3)?,
                        user_sub: row.get(4)?,
                        user_email: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(creds)
    }

    /// Insert or replace the credentials for `creds.platform`.
    pub fn upsert_credentials(
        &self,
        creds: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.tx.execute(
            "INSERT INTO oauth_tokens
             (platform, access_token, refresh_token, expires_at, user_sub, user_email,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(platform) DO UPDATE SET
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 expires_at = excluded.expires_at,
                 user_sub = excluded.user_sub,
                 user_email = excluded.user_email,
                 updated_at = excluded.updated_at",
            params![
                creds.platform,
                creds.access_token,
                creds.refresh_token,
                creds.expires_at.map(encode_ts),
                creds.user_sub,
                creds.user_email,
                encode_ts(now),
            ],
        )?;
        info!(platform = %creds.platform, "stored platform credentials");
        Ok(())
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        job_type: row.get(1)?,
        status: row.get(2)?,
        post_id: row.get(3)?,
        scheduled_at: opt_ts_column(row, 4)?,
        priority: row.get(5)?,
        attempts: row.get(6)?,
        max_attempts: row.get(7)?,
        last_error: row.get(8)?,
        next_retry_at: opt_ts_column(row, 9)?,
        started_at: opt_ts_column(row, 10)?,
        completed_at: opt_ts_column(row, 11)?,
        source_file: row.get(12)?,
        source_hash: row.get(13)?,
        created_at: ts_column(row, 14)?,
        updated_at: ts_column(row, 15)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        content: row.get(1)?,
        platform: row.get(2)?,
        status: row.get(3)?,
        scheduled_at: opt_ts_column(row, 4)?,
        posted_at: opt_ts_column(row, 5)?,
        external_id: row.get(6)?,
        error_message: row.get(7)?,
        created_at: ts_column(row, 8)?,
        updated_at: ts_column(row, 9)?,
    })
}

/// Fixed-width UTC timestamps, so text comparison in SQL is chronological.
pub(crate) fn encode_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    decode_ts(idx, &text)
}

fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| decode_ts(idx, &t)).transpose()
}

macro_rules! sql_text {
    ($($ty:ty),+) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: QueueError| FromSqlError::Other(Box::new(e)))
            }
        }
    )+};
}

sql_text!(Platform, JobType, JobStatus, PostStatus);

macro_rules! sql_id {
    ($($ty:ident),+) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($ty)
            }
        }
    )+};
}

sql_id!(JobId, PostId);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with_post() -> (Store, PostId) {
        let store = Store::open_in_memory().unwrap();
        let post_id = store
            .unit_of_work(|uow| {
                uow.insert_post("hello", Platform::LinkedIn, PostStatus::Approved, Utc::now())
                    .map(|p| p.id)
            })
            .unwrap();
        (store, post_id)
    }

    fn insert(store: &Store, job: NewJob) -> JobRecord {
        store
            .unit_of_work(|uow| uow.insert_job(&job, Utc::now()))
            .unwrap()
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let base = Utc::now();
        let a = encode_ts(base);
        let b = encode_ts(base + Duration::microseconds(1));
        let c = encode_ts(base + Duration::days(400));
        assert!(a < b && b < c);
        assert_eq!(a.len(), c.len());
    }

    #[test]
    fn test_post_roundtrip() {
        let (store, post_id) = store_with_post();
        let post = store.unit_of_work(|uow| uow.require_post(post_id)).unwrap();

        assert_eq!(post.content, "hello");
        assert_eq!(post.platform, Platform::LinkedIn);
        assert_eq!(post.status, PostStatus::Approved);
        assert!(post.scheduled_at.is_none());
    }

    #[test]
    fn test_insert_job_defaults() {
        let (store, post_id) = store_with_post();
        let job = insert(&store, NewJob::new(post_id, Platform::LinkedIn));

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_type, JobType::PublishToLinkedIn);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.priority, 0);
    }

    #[test]
    fn test_job_for_missing_post_rejected() {
        let store = Store::open_in_memory().unwrap();
        let result =
            store.unit_of_work(|uow| uow.insert_job(&NewJob::new(PostId(42), Platform::Blog), Utc::now()));
        assert!(matches!(result, Err(QueueError::Database(_))));
    }

    #[test]
    fn test_failed_unit_of_work_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<(), QueueError> = store.unit_of_work(|uow| {
            uow.insert_post("doomed", Platform::LinkedIn, PostStatus::Draft, Utc::now())?;
            Err(QueueError::Validation("abort".to_string()))
        });
        assert!(result.is_err());

        let post = store.unit_of_work(|uow| uow.get_post(PostId(1))).unwrap();
        assert!(post.is_none());
    }

    #[test]
    fn test_find_due_filters_and_orders() {
        let (store, post_id) = store_with_post();
        let now = Utc::now();

        let mut later = NewJob::new(post_id, Platform::LinkedIn);
        later.scheduled_at = Some(now - Duration::minutes(5));
        let later = insert(&store, later);

        let mut earlier = NewJob::new(post_id, Platform::LinkedIn);
        earlier.scheduled_at = Some(now - Duration::minutes(10));
        let earlier = insert(&store, earlier);

        let mut urgent = NewJob::new(post_id, Platform::LinkedIn);
        urgent.priority = 100;
        let urgent = insert(&store, urgent);

        let mut future = NewJob::new(post_id, Platform::LinkedIn);
        future.scheduled_at = Some(now + Duration::hours(1));
        insert(&store, future);

        let due = store.unit_of_work(|uow| uow.find_due(now)).unwrap();
        let ids: Vec<JobId> = due.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![urgent.id, earlier.id, later.id]);
    }

    #[test]
    fn test_find_due_skips_backing_off_jobs() {
        let (store, post_id) = store_with_post();
        let now = Utc::now();
        let mut job = insert(&store, NewJob::new(post_id, Platform::LinkedIn));
        job.next_retry_at = Some(now + Duration::seconds(60));
        store.unit_of_work(|uow| uow.update_job(&job)).unwrap();

        assert!(store.unit_of_work(|uow| uow.find_due(now)).unwrap().is_empty());
        let due = store
            .unit_of_work(|uow| uow.find_due(now + Duration::seconds(60)))
            .unwrap();
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn test_find_active_by_source_file_ignores_terminal() {
        let (store, post_id) = store_with_post();
        let mut job = NewJob::new(post_id, Platform::LinkedIn);
        job.source_file = Some("posts/a.md".to_string());
        let mut job = insert(&store, job);

        let found = store
            .unit_of_work(|uow| uow.find_active_by_source_file("posts/a.md"))
            .unwrap();
        assert_eq!(found.map(|j| j.id), Some(job.id));

        job.status = JobStatus::Cancelled;
        store.unit_of_work(|uow| uow.update_job(&job)).unwrap();
        let found = store
            .unit_of_work(|uow| uow.find_active_by_source_file("posts/a.md"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_credentials_upsert_replaces() {
        let store = Store::open_in_memory().unwrap();
        let mut creds = Credentials {
            platform: Platform::LinkedIn,
            access_token: "first".to_string(),
            refresh_token: None,
            expires_at: None,
            user_sub: Some("sub-1".to_string()),
            user_email: None,
        };
        store
            .unit_of_work(|uow| uow.upsert_credentials(&creds, Utc::now()))
            .unwrap();
        creds.access_token = "second".to_string();
        store
            .unit_of_work(|uow| uow.upsert_credentials(&creds, Utc::now()))
            .unwrap();

        let stored = store
            .unit_of_work(|uow| uow.get_credentials(Platform::LinkedIn))
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, "second");
        assert!(
            store
                .unit_of_work(|uow| uow.get_credentials(Platform::Twitter))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_open_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.db");

        let post_id = {
            let store = Store::open(&path).unwrap();
            store
                .unit_of_work(|uow| {
                    uow.insert_post("persisted", Platform::Blog, PostStatus::Draft, Utc::now())
                        .map(|p| p.id)
                })
                .unwrap()
        };

        let store = Store::open(&path).unwrap();
        let post = store.unit_of_work(|uow| uow.require_post(post_id)).unwrap();
        assert_eq!(post.content, "persisted");
        assert_eq!(post.platform, Platform::Blog);
    }
}
