//! Integration tests for Content Engine.
//!
//! Drive the MCP tool surface and the worker against one shared store, the
//! way `mcp-server` and `worker` share a database file in production.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use content_engine_mcp::{McpServer, ToolRegistry, ToolState};
use content_engine_publish::{PublishConfig, default_registry};
use content_engine_queue::{Enqueuer, JobStatus, Store, Worker, WorkerConfig};

// Helper to run one MCP session and collect the tool results as JSON
async fn mcp_session(store: &Arc<Store>, calls: &[(&str, Value)]) -> Vec<Value> {
    let mut server = McpServer::new(ToolRegistry::new(ToolState::new(Enqueuer::new(
        store.clone(),
    ))));

    let input: String = calls
        .iter()
        .enumerate()
        .map(|(id, (name, arguments))| {
            format!(
                "{}\n",
                json!({"jsonrpc": "2.0", "id": id, "method": "tools/call",
                       "params": {"name": name, "arguments": arguments}})
            )
        })
        .collect();
    let mut output = Vec::new();
    server.run(input.as_bytes(), &mut output).await.unwrap();

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| {
            let response: Value = serde_json::from_str(line).unwrap();
            let text = response["result"]["content"][0]["text"].as_str().unwrap();
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        })
        .collect()
}

fn dry_run_worker(store: &Arc<Store>) -> Worker {
    let registry = default_registry(&PublishConfig::default()).unwrap();
    Worker::new(
        store.clone(),
        registry,
        WorkerConfig {
            dry_run: true,
            ..WorkerConfig::default()
        },
    )
}

#[tokio::test]
async fn test_fire_through_mcp_then_worker_publishes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("content.db")).unwrap());

    let results = mcp_session(
        &store,
        &[("ingest", json!({"content": "Shipping the queue today"}))],
    )
    .await;
    let post_id = results[0]["post_id"].clone();

    let results = mcp_session(&store, &[("fire", json!({"post_id": post_id}))]).await;
    assert_eq!(results[0]["action"], "queued_immediate");
    let job_id = results[0]["job_id"].as_i64().unwrap();

    let report = dry_run_worker(&store).process_queue().await.unwrap();
    assert_eq!(report.completed, 1);

    let results = mcp_session(
        &store,
        &[
            ("status", json!({"job_id": job_id})),
            ("status", json!({"post_id": post_id})),
        ],
    )
    .await;
    assert_eq!(results[0]["status"], JobStatus::Completed.as_str());
    assert_eq!(results[0]["attempts"], 1);
    assert_eq!(results[1]["post_status"], "posted");
    assert_eq!(results[1]["external_id"], format!("dry-run-{}", job_id));
}

#[tokio::test]
async fn test_future_schedule_is_left_alone_by_worker() {
    let store = Arc::new(Store::open_in_memory().unwrap());

    let results = mcp_session(
        &store,
        &[("ingest", json!({"content": "Later", "source_file": "drafts/later.md"}))],
    )
    .await;
    let post_id = results[0]["post_id"].clone();

    let results = mcp_session(
        &store,
        &[
            (
                "schedule",
                json!({"post_id": post_id, "scheduled_at": "2099-06-01T09:00:00",
                       "source_file": "drafts/later.md"}),
            ),
            ("sync", json!({"source_file": "drafts/later.md", "content": "Later, edited"})),
        ],
    )
    .await;
    assert_eq!(results[0]["action"], "scheduled");
    assert_eq!(results[1]["action"], "updated");

    let report = dry_run_worker(&store).process_queue().await.unwrap();
    assert!(report.is_empty());

    let results = mcp_session(&store, &[("list_pending", json!({}))]).await;
    assert_eq!(results[0]["count"], 1);
    assert_eq!(results[0]["jobs"][0]["source_file"], "drafts/later.md");
}

#[tokio::test]
async fn test_twitter_job_fails_without_retry() {
    let store = Arc::new(Store::open_in_memory().unwrap());

    let results = mcp_session(
        &store,
        &[("ingest", json!({"content": "short", "platform": "twitter"}))],
    )
    .await;
    let post_id = results[0]["post_id"].clone();
    mcp_session(&store, &[("fire", json!({"post_id": post_id}))]).await;

    // Real publishers, not dry run: Twitter has none registered
    let worker = Worker::new(
        store.clone(),
        default_registry(&PublishConfig::default()).unwrap(),
        WorkerConfig::default(),
    );
    let report = worker.process_queue().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);

    let results = mcp_session(&store, &[("status", json!({"post_id": post_id}))]).await;
    assert_eq!(results[0]["post_status"], "failed");
    assert!(
        results[0]["error_message"]
            .as_str()
            .unwrap()
            .contains("twitter")
    );
}
