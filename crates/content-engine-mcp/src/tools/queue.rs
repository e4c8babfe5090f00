//! Publish queue tools: the control-plane operations of the queue.

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::warn;

use content_engine_queue::{
    CancelOutcome, CancelTarget, IngestOutcome, JobId, Platform, PostId, QueueError, SyncOutcome,
    parse_schedule_time,
};

use super::{ToolState, optional_i64, optional_str, required_i64, required_str, respond};
use crate::protocol::{CallToolResult, ToolDefinition};

const DEFAULT_PENDING_LIMIT: i64 = 20;
const DEFAULT_DAYS_AHEAD: i64 = 7;

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "ingest".to_string(),
            description: "Ingest content as an approved post. If source_file already has an active job, that post's content is updated instead.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "Post text"
                    },
                    "platform": {
                        "type": "string",
                        "enum": ["linkedin", "twitter", "blog"],
                        "description": "Target platform",
                        "default": "linkedin"
                    },
                    "source_file": {
                        "type": "string",
                        "description": "Path of the file the content came from, for later sync"
                    }
                },
                "required": ["content"]
            }),
        },
        ToolDefinition {
            name: "schedule".to_string(),
            description: "Schedule a post for future publishing. Reschedules the post's existing job if it has one.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "post_id": {
                        "type": "integer",
                        "description": "ID of the post to schedule"
                    },
                    "scheduled_at": {
                        "type": "string",
                        "description": "ISO 8601 time (e.g. '2026-02-10T09:00:00'); naive times are UTC"
                    },
                    "priority": {
                        "type": "integer",
                        "description": "Higher runs first among due jobs",
                        "default": 0
                    },
                    "source_file": {
                        "type": "string",
                        "description": "Source file to track for sync"
                    }
                },
                "required": ["post_id", "scheduled_at"]
            }),
        },
        ToolDefinition {
            name: "fire".to_string(),
            description: "Queue a post for immediate publishing at top priority. The worker publishes it on its next cycle.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "post_id": {
                        "type": "integer",
                        "description": "ID of the post to publish"
                    }
                },
                "required": ["post_id"]
            }),
        },
        ToolDefinition {
            name: "cancel".to_string(),
            description: "Cancel a pending job, or every pending job of a post.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "job_id": {
                        "type": "integer",
                        "description": "Job to cancel"
                    },
                    "post_id": {
                        "type": "integer",
                        "description": "Post whose pending jobs are cancelled"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "status".to_string(),
            description: "Show the status of a job, or of a post and all of its jobs.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "job_id": {
                        "type": "integer",
                        "description": "Job to inspect"
                    },
                    "post_id": {
                        "type": "integer",
                        "description": "Post to inspect"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "list_pending".to_string(),
            description: "List pending jobs in the order the worker would take them.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of jobs to return",
                        "default": DEFAULT_PENDING_LIMIT
                    }
                }
            }),
        },
        ToolDefinition {
            name: "list_scheduled".to_string(),
            description: "List pending jobs scheduled within the next N days, with a content preview.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "days_ahead": {
                        "type": "integer",
                        "description": "How many days ahead to look",
                        "default": DEFAULT_DAYS_AHEAD
                    }
                }
            }),
        },
        ToolDefinition {
            name: "sync".to_string(),
            description: "Re-sync a queued post from its source file. Content is only rewritten when its hash changed.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "source_file": {
                        "type": "string",
                        "description": "Source file the post was ingested from"
                    },
                    "content": {
                        "type": "string",
                        "description": "Current content of the file"
                    }
                },
                "required": ["source_file", "content"]
            }),
        },
    ]
}

fn failed(tool: &str, e: QueueError) -> CallToolResult {
    if !e.is_validation() {
        warn!(tool, error = %e, "tool failed");
    }
    CallToolResult::error(e.to_string())
}

pub fn ingest(state: &ToolState, arguments: &HashMap<String, Value>) -> CallToolResult {
    let content = match required_str(arguments, "content") {
        Ok(c) => c,
        Err(e) => return CallToolResult::error(e),
    };
    let platform = match optional_str(arguments, "platform").map(str::parse::<Platform>) {
        None => Platform::LinkedIn,
        Some(Ok(p)) => p,
        Some(Err(e)) => return CallToolResult::error(e.to_string()),
    };
    let source_file = optional_str(arguments, "source_file");

    match state.enqueuer.ingest(content, platform, source_file) {
        Ok(outcome) => {
            let message = match outcome {
                IngestOutcome::Created { .. } => "Content ingested and approved",
                IngestOutcome::Updated { .. } => "Existing post updated with new content",
            };
            respond(&outcome, Some(message))
        }
        Err(e) => failed("ingest", e),
    }
}

pub fn schedule(state: &ToolState, arguments: &HashMap<String, Value>) -> CallToolResult {
    let post_id = match required_i64(arguments, "post_id") {
        Ok(id) => PostId(id),
        Err(e) => return CallToolResult::error(e),
    };
    let when = match required_str(arguments, "scheduled_at").map(parse_schedule_time) {
        Ok(Ok(when)) => when,
        Ok(Err(e)) => return CallToolResult::error(e.to_string()),
        Err(e) => return CallToolResult::error(e),
    };
    let priority = match optional_i64(arguments, "priority") {
        Ok(p) => p.unwrap_or(0),
        Err(e) => return CallToolResult::error(e),
    };
    let source_file = optional_str(arguments, "source_file");

    match state.enqueuer.schedule(post_id, when, priority, source_file) {
        Ok(outcome) => respond(&outcome, None),
        Err(e) => failed("schedule", e),
    }
}

pub fn fire(state: &ToolState, arguments: &HashMap<String, Value>) -> CallToolResult {
    let post_id = match required_i64(arguments, "post_id") {
        Ok(id) => PostId(id),
        Err(e) => return CallToolResult::error(e),
    };

    match state.enqueuer.fire(post_id) {
        Ok(outcome) => respond(
            &outcome,
            Some("Post queued for immediate publishing. Run worker to process."),
        ),
        Err(e) => failed("fire", e),
    }
}

pub fn cancel(state: &ToolState, arguments: &HashMap<String, Value>) -> CallToolResult {
    let ids = optional_i64(arguments, "job_id")
        .and_then(|job| optional_i64(arguments, "post_id").map(|post| (job, post)));
    let (job_id, post_id) = match ids {
        Ok(ids) => ids,
        Err(e) => return CallToolResult::error(e),
    };
    let target = match CancelTarget::from_ids(job_id.map(JobId), post_id.map(PostId)) {
        Ok(t) => t,
        Err(e) => return CallToolResult::error(e.to_string()),
    };

    match state.enqueuer.cancel(target) {
        Ok(outcome) => {
            let message = match outcome {
                CancelOutcome::NothingPending { .. } => Some("No pending jobs found for this post"),
                _ => None,
            };
            respond(&outcome, message)
        }
        Err(e) => failed("cancel", e),
    }
}

pub fn status(state: &ToolState, arguments: &HashMap<String, Value>) -> CallToolResult {
    let (job_id, post_id) = match (
        optional_i64(arguments, "job_id"),
        optional_i64(arguments, "post_id"),
    ) {
        (Ok(job), Ok(post)) => (job.map(JobId), post.map(PostId)),
        (Err(e), _) | (_, Err(e)) => return CallToolResult::error(e),
    };

    match state.enqueuer.status(job_id, post_id) {
        Ok(view) => respond(&view, None),
        Err(e) => failed("status", e),
    }
}

pub fn list_pending(state: &ToolState, arguments: &HashMap<String, Value>) -> CallToolResult {
    let limit = match optional_i64(arguments, "limit") {
        Ok(l) => l.unwrap_or(DEFAULT_PENDING_LIMIT),
        Err(e) => return CallToolResult::error(e),
    };
    let Ok(limit) = usize::try_from(limit) else {
        return CallToolResult::error("limit must not be negative");
    };

    match state.enqueuer.list_pending(limit) {
        Ok(list) => respond(&list, None),
        Err(e) => failed("list_pending", e),
    }
}

pub fn list_scheduled(state: &ToolState, arguments: &HashMap<String, Value>) -> CallToolResult {
    let days_ahead = match optional_i64(arguments, "days_ahead") {
        Ok(d) => d.unwrap_or(DEFAULT_DAYS_AHEAD),
        Err(e) => return CallToolResult::error(e),
    };

    match state.enqueuer.list_scheduled(days_ahead) {
        Ok(list) => respond(&list, None),
        Err(e) => failed("list_scheduled", e),
    }
}

pub fn sync(state: &ToolState, arguments: &HashMap<String, Value>) -> CallToolResult {
    let source_file = match required_str(arguments, "source_file") {
        Ok(s) => s,
        Err(e) => return CallToolResult::error(e),
    };
    let content = match required_str(arguments, "content") {
        Ok(c) => c,
        Err(e) => return CallToolResult::error(e),
    };

    match state.enqueuer.sync(source_file, content) {
        Ok(outcome) => {
            let message = match outcome {
                SyncOutcome::NotFound { .. } => "No pending job found for this source file",
                SyncOutcome::Unchanged { .. } => "Content unchanged",
                SyncOutcome::Updated { .. } => "Content updated from source file",
            };
            respond(&outcome, Some(message))
        }
        Err(e) => failed("sync", e),
    }
}
