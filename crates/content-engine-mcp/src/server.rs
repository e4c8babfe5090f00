//! MCP server: newline-delimited JSON-RPC over a reader/writer pair.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, PROTOCOL_VERSION, ServerCapabilities, ServerInfo, ToolsCapability, codes,
};
use crate::tools::ToolRegistry;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A failed request: JSON-RPC code plus message.
type RpcFailure = (i32, String);

pub struct McpServer {
    tools: ToolRegistry,
    initialized: bool,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools,
            initialized: false,
        }
    }

    /// Serve on stdin/stdout until stdin closes.
    pub async fn run_stdio(&mut self) -> Result<(), McpError> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    /// Serve one request per line of `input` until it reaches EOF.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<(), McpError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("MCP server starting");

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            debug!(request = %line, "received request");

            if let Some(response) = self.handle_line(&line) {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "sending response");
                output.write_all(response_json.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
        }

        info!("MCP server shutting down");
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                error!(error = %e, "failed to parse request");
                return Some(JsonRpcResponse::error(
                    None,
                    codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        // Notifications get no response
        if request.id.is_none() {
            debug!(method = %request.method, "notification");
            return None;
        }

        Some(match self.handle_request(&request) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err((code, message)) => JsonRpcResponse::error(request.id, code, message),
        })
    }

    fn handle_request(&mut self, request: &JsonRpcRequest) -> Result<Value, RpcFailure> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "ping" => Ok(Value::Object(Default::default())),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(request),
            other => Err((
                codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", other),
            )),
        }
    }

    fn handle_initialize(&mut self, request: &JsonRpcRequest) -> Result<Value, RpcFailure> {
        let params: InitializeParams = parse_params(request, "initialize")?;
        info!(
            client = params.client_info.as_ref().map(|c| c.name.as_str()),
            protocol = %params.protocol_version,
            "client initialized"
        );
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "content-engine".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        to_value(result)
    }

    fn handle_list_tools(&self) -> Result<Value, RpcFailure> {
        to_value(ListToolsResult {
            tools: self.tools.definitions(),
        })
    }

    fn handle_call_tool(&self, request: &JsonRpcRequest) -> Result<Value, RpcFailure> {
        let params: CallToolParams = parse_params(request, "call")?;
        debug!(tool = %params.name, initialized = self.initialized, "executing tool");

        let result = self.tools.execute(&params.name, &params.arguments);
        to_value(result)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    request: &JsonRpcRequest,
    what: &str,
) -> Result<T, RpcFailure> {
    let params = request.params.clone().ok_or_else(|| {
        (
            codes::INVALID_PARAMS,
            format!("Missing {} params", what),
        )
    })?;
    serde_json::from_value(params)
        .map_err(|e| (codes::INVALID_PARAMS, format!("Invalid {} params: {}", what, e)))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, RpcFailure> {
    serde_json::to_value(value).map_err(|e| (codes::INTERNAL_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use content_engine_queue::{Enqueuer, Store};
    use serde_json::json;

    use crate::tools::ToolState;

    fn server() -> McpServer {
        let store = Arc::new(Store::open_in_memory().unwrap());
        McpServer::new(ToolRegistry::new(ToolState::new(Enqueuer::new(store))))
    }

    async fn exchange(server: &mut McpServer, requests: &[Value]) -> Vec<Value> {
        let input: String = requests
            .iter()
            .map(|r| format!("{}\n", r))
            .collect();
        let mut output = Vec::new();
        server.run(input.as_bytes(), &mut output).await.unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let mut server = server();
        let responses = exchange(
            &mut server,
            &[
                json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                       "params": {"protocolVersion": "2024-11-05", "capabilities": {},
                                  "clientInfo": {"name": "test", "version": "1"}}}),
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            ],
        )
        .await;

        // The notification produced nothing
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "content-engine");
        assert_eq!(responses[0]["result"]["capabilities"]["tools"]["listChanged"], false);

        let names: Vec<&str> = responses[1]["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"schedule"));
        assert!(names.contains(&"sync"));
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let mut server = server();
        let responses = exchange(
            &mut server,
            &[json!({"jsonrpc": "2.0", "id": "a", "method": "tools/call",
                     "params": {"name": "ingest", "arguments": {"content": "hi"}}})],
        )
        .await;

        let result = &responses[0]["result"];
        assert_eq!(result["isError"], false);
        let text: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(text["action"], "created");
        assert_eq!(text["platform"], "linkedin");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let mut server = server();
        let mut output = Vec::new();
        let input = "not json\n{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"resources/list\"}\n";
        server.run(input.as_bytes(), &mut output).await.unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses[0]["error"]["code"], codes::PARSE_ERROR);
        assert_eq!(responses[1]["error"]["code"], codes::METHOD_NOT_FOUND);
        assert_eq!(responses[1]["id"], 5);
    }

    #[tokio::test]
    async fn test_call_without_params() {
        let mut server = server();
        let responses = exchange(
            &mut server,
            &[json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call"})],
        )
        .await;
        assert_eq!(responses[0]["error"]["code"], codes::INVALID_PARAMS);
    }
}
