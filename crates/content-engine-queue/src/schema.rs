//! Versioned SQLite schema.
//!
//! The applied version lives in `PRAGMA user_version`. Opening a store applies
//! every migration above that version, in order, inside one transaction.

use rusqlite::Connection;
use tracing::info;

use crate::QueueError;

/// One schema step.
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

const POSTS_AND_JOB_QUEUE_V1: Migration = Migration {
    version: 1,
    description: "posts and job_queue",
    sql: "
        CREATE TABLE posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL,
            platform TEXT NOT NULL DEFAULT 'linkedin',
            status TEXT NOT NULL DEFAULT 'draft',
            scheduled_at TEXT,
            posted_at TEXT,
            external_id TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX ix_posts_status ON posts(status);

        CREATE TABLE job_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            post_id INTEGER NOT NULL REFERENCES posts(id),
            scheduled_at TEXT,
            priority INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            last_error TEXT,
            next_retry_at TEXT,
            started_at TEXT,
            completed_at TEXT,
            source_file TEXT,
            source_hash TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX ix_job_queue_status ON job_queue(status);
        CREATE INDEX ix_job_queue_scheduled_at ON job_queue(scheduled_at);
        CREATE INDEX ix_job_queue_source_file ON job_queue(source_file);
        CREATE INDEX ix_job_queue_post_id ON job_queue(post_id);
    ",
};

const OAUTH_TOKENS_V2: Migration = Migration {
    version: 2,
    description: "oauth_tokens",
    sql: "
        CREATE TABLE oauth_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform TEXT NOT NULL UNIQUE,
            access_token TEXT NOT NULL,
            refresh_token TEXT,
            expires_at TEXT,
            user_sub TEXT,
            user_email TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    ",
};

/// All migrations, in ascending version order.
pub const MIGRATIONS: &[Migration] = &[POSTS_AND_JOB_QUEUE_V1, OAUTH_TOKENS_V2];

/// Version a fully migrated database reports.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Bring `conn` up to the latest schema version.
pub fn migrate(conn: &mut Connection) -> Result<u32, QueueError> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();

    if current > latest {
        return Err(QueueError::Corrupt(format!(
            "database schema version {} is newer than supported version {}",
            current, latest
        )));
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }
    tx.commit()?;

    Ok(latest)
}
