//! Tool definitions and dispatch for the MCP server.
//!
//! Each control-plane operation of the queue is one tool. Tools live in
//! category modules that expose a `definitions()` list plus one function per
//! tool taking `(&ToolState, &HashMap<String, Value>)` and returning a
//! [`CallToolResult`]. Failures are reported as `isError` results so the
//! client sees the message instead of a JSON-RPC error.

mod queue;

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use content_engine_queue::Enqueuer;

use crate::protocol::{CallToolResult, ToolDefinition};

/// Shared state handed to every tool.
pub struct ToolState {
    pub enqueuer: Enqueuer,
}

impl ToolState {
    pub fn new(enqueuer: Enqueuer) -> Self {
        Self { enqueuer }
    }
}

pub struct ToolRegistry {
    state: ToolState,
}

impl ToolRegistry {
    pub fn new(state: ToolState) -> Self {
        Self { state }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        queue::definitions()
    }

    /// Run the named tool. Unknown names yield an error result listing the
    /// available tools.
    pub fn execute(&self, name: &str, arguments: &HashMap<String, Value>) -> CallToolResult {
        let state = &self.state;
        match name {
            "ingest" => queue::ingest(state, arguments),
            "schedule" => queue::schedule(state, arguments),
            "fire" => queue::fire(state, arguments),
            "cancel" => queue::cancel(state, arguments),
            "status" => queue::status(state, arguments),
            "list_pending" => queue::list_pending(state, arguments),
            "list_scheduled" => queue::list_scheduled(state, arguments),
            "sync" => queue::sync(state, arguments),
            _ => {
                let available: Vec<String> =
                    self.definitions().into_iter().map(|d| d.name).collect();
                CallToolResult::error(format!(
                    "Unknown tool: {}. Available: {}",
                    name,
                    available.join(", ")
                ))
            }
        }
    }
}

fn required_str<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> Result<&'a str, String> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {}", key))
}

fn optional_str<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(|v| v.as_str())
}

fn required_i64(arguments: &HashMap<String, Value>, key: &str) -> Result<i64, String> {
    optional_i64(arguments, key)?.ok_or_else(|| format!("Missing required parameter: {}", key))
}

/// An integer argument. Null counts as absent; any other non-integer is an error.
fn optional_i64(arguments: &HashMap<String, Value>, key: &str) -> Result<Option<i64>, String> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("Parameter {} must be an integer", key)),
    }
}

/// Serialize `value` as the tool's JSON text, adding a human-readable message.
fn respond<T: Serialize>(value: &T, message: Option<&str>) -> CallToolResult {
    let mut json = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => return CallToolResult::error(format!("Failed to encode result: {}", e)),
    };
    if let (Some(message), Value::Object(map)) = (message, &mut json) {
        map.insert("message".to_string(), Value::String(message.to_string()));
    }
    CallToolResult::success(json.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_integer_arguments() {
        let a = args(json!({"post_id": 4, "limit": null, "bad": "x"}));
        assert_eq!(required_i64(&a, "post_id"), Ok(4));
        assert_eq!(optional_i64(&a, "limit"), Ok(None));
        assert_eq!(optional_i64(&a, "missing"), Ok(None));
        assert_eq!(
            optional_i64(&a, "bad"),
            Err("Parameter bad must be an integer".to_string())
        );
        assert_eq!(
            required_i64(&a, "job_id"),
            Err("Missing required parameter: job_id".to_string())
        );
    }

    #[test]
    fn test_respond_adds_message() {
        let result = respond(&json!({"action": "none"}), Some("nothing to do"));
        assert!(!result.is_error);
        let parsed: Value = serde_json::from_str(result.text()).unwrap();
        assert_eq!(parsed, json!({"action": "none", "message": "nothing to do"}));
    }
}
