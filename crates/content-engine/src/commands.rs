//! One-shot control-plane commands. Each prints its result as JSON on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Serialize;

use content_engine_queue::{
    CancelTarget, Credentials, Enqueuer, JobId, Platform, PostId, QueueError, Store,
    parse_schedule_time,
};

/// Default database location under the user's data directory.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("content-engine").join("content.db"))
}

/// Open (creating if needed) the queue database.
pub fn open_store(db: Option<PathBuf>) -> Result<Arc<Store>> {
    let path = db
        .or_else(default_db_path)
        .ok_or_else(|| miette::miette!("no data directory found; pass --db or set CONTENT_ENGINE_DB"))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }

    let store = Store::open(&path).map_err(|e| miette::miette!("{}", e))?;
    Ok(Arc::new(store))
}

/// Print an operation's result as pretty JSON, or fail with its error.
pub fn print_json<T: Serialize>(result: Result<T, QueueError>) -> Result<()> {
    let value = result.map_err(|e| miette::miette!("{}", e))?;
    let text = serde_json::to_string_pretty(&value).into_diagnostic()?;
    println!("{}", text);
    Ok(())
}

pub fn cancel(enqueuer: &Enqueuer, job_id: Option<i64>, post_id: Option<i64>) -> Result<()> {
    let target = CancelTarget::from_ids(job_id.map(JobId), post_id.map(PostId))
        .map_err(|e| miette::miette!("{}", e))?;
    print_json(enqueuer.cancel(target))
}

pub fn schedule(
    enqueuer: &Enqueuer,
    post_id: i64,
    when: &str,
    priority: i64,
    source_file: Option<&str>,
) -> Result<()> {
    let when = parse_schedule_time(when).map_err(|e| miette::miette!("{}", e))?;
    print_json(enqueuer.schedule(PostId(post_id), when, priority, source_file))
}

pub fn ingest(
    enqueuer: &Enqueuer,
    file: Option<PathBuf>,
    content: Option<String>,
    platform: Platform,
) -> Result<()> {
    let (content, source_file) = match (content, file) {
        (Some(content), _) => (content, None),
        (None, Some(file)) => (read_source(&file)?, Some(source_name(&file))),
        (None, None) => return Err(miette::miette!("provide a FILE or --content")),
    };

    print_json(enqueuer.ingest(&content, platform, source_file.as_deref()))
}

pub fn sync(enqueuer: &Enqueuer, file: &Path) -> Result<()> {
    let content = read_source(file)?;
    print_json(enqueuer.sync(&source_name(file), &content))
}

pub fn import_credentials(
    store: &Store,
    mut credentials: Credentials,
    expires_at: Option<&str>,
) -> Result<()> {
    credentials.expires_at = expires_at
        .map(parse_schedule_time)
        .transpose()
        .map_err(|e| miette::miette!("{}", e))?;

    let platform = credentials.platform;
    store
        .unit_of_work(|uow| uow.upsert_credentials(&credentials, Utc::now()))
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Stored {} credentials", platform);
    Ok(())
}

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", file.display()))
}

/// The name a source file is tracked under. The queue normalizes it, so
/// `./posts/a.md` and `posts/a.md` name the same file.
fn source_name(file: &Path) -> String {
    file.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_engine_queue::source_key;

    #[test]
    fn test_open_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");

        open_store(Some(path.clone())).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_ingest_then_sync_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(Some(dir.path().join("q.db"))).unwrap();
        let enqueuer = Enqueuer::new(store.clone());

        let file = dir.path().join("post.md");
        std::fs::write(&file, "first draft").unwrap();
        ingest(&enqueuer, Some(file.clone()), None, Platform::LinkedIn).unwrap();

        let pending = store
            .unit_of_work(|uow| uow.find_active_by_source_file(&source_name(&file)))
            .unwrap();
        // Ingest alone creates no job
        assert!(pending.is_none());

        std::fs::write(&file, "second draft").unwrap();
        sync(&enqueuer, &file).unwrap();
    }

    #[test]
    fn test_sync_finds_file_scheduled_under_another_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(Some(dir.path().join("q.db"))).unwrap();
        let enqueuer = Enqueuer::new(store.clone());

        let posts = dir.path().join("posts");
        std::fs::create_dir_all(posts.join("drafts")).unwrap();
        let file = posts.join("a.md");
        let dotted = posts.join(".").join("drafts").join("..").join("a.md");
        std::fs::write(&file, "first draft").unwrap();

        ingest(&enqueuer, Some(dotted.clone()), None, Platform::LinkedIn).unwrap();
        let dotted = dotted.display().to_string();
        schedule(&enqueuer, 1, "2099-01-01T09:00:00", 0, Some(&dotted)).unwrap();

        std::fs::write(&file, "second draft").unwrap();
        sync(&enqueuer, &file).unwrap();

        let job = store
            .unit_of_work(|uow| uow.find_active_by_source_file(&source_key(&source_name(&file))))
            .unwrap()
            .unwrap();
        let post = store.unit_of_work(|uow| uow.require_post(job.post_id)).unwrap();
        assert_eq!(post.content, "second draft");
    }

    #[test]
    fn test_import_credentials_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let creds = Credentials {
            platform: Platform::LinkedIn,
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: None,
            user_sub: Some("member".to_string()),
            user_email: None,
        };

        import_credentials(&store, creds, Some("2030-01-01T00:00:00Z")).unwrap();

        let stored = store
            .unit_of_work(|uow| uow.get_credentials(Platform::LinkedIn))
            .unwrap()
            .unwrap();
        assert_eq!(stored.access_token, "tok");
        assert_eq!(
            stored.expires_at.map(|t| t.to_rfc3339()),
            Some("2030-01-01T00:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_bad_expiry_rejected() {
        let store = Store::open_in_memory().unwrap();
        let creds = Credentials {
            platform: Platform::LinkedIn,
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: None,
            user_sub: None,
            user_email: None,
        };
        assert!(import_credentials(&store, creds, Some("soon")).is_err());
    }
}
