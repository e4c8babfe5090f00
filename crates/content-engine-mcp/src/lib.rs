//! MCP server exposing the Content Engine publish queue.
//!
//! Speaks newline-delimited JSON-RPC on stdio. Every control-plane
//! operation of the queue (ingest, schedule, fire, cancel, status,
//! list_pending, list_scheduled, sync) is offered as a tool.

pub mod protocol;
mod server;
mod tools;

pub use server::{McpError, McpServer};
pub use tools::{ToolRegistry, ToolState};
