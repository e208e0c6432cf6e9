//! Line-delimited MCP server over stdio.
//!
//! One JSON-RPC object per line on stdin, one response per line on
//! stdout; notifications produce no response. Requests are handled
//! strictly in receipt order -- the broker is single-threaded by design.
//! Log lines go to stderr only; stdout carries nothing but the protocol.

use std::io::{BufRead, Write};

use serde_json::{json, Value};

use super::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::broker::{Broker, ToolError};

/// Server name reported on `initialize`.
const SERVER_NAME: &str = "SafeExecMCP";

/// MCP protocol revision implemented here.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// The stdio protocol server wrapping one broker.
pub struct McpServer {
    broker: Broker,
}

impl McpServer {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    /// Serves requests until the reader is exhausted.
    pub fn run(&mut self, reader: impl BufRead, mut writer: impl Write) -> std::io::Result<()> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line) {
                let rendered = serde_json::to_string(&response)
                    .unwrap_or_else(|e| format!(r#"{{"jsonrpc":"2.0","error":{{"code":-32603,"message":"{e}"}},"id":null}}"#));
                writeln!(writer, "{rendered}")?;
                writer.flush()?;
            }
        }
        tracing::info!("transport closed, shutting down");
        Ok(())
    }

    /// Handles one wire line. `None` means no response (notification).
    pub fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    JsonRpcError::parse_error(e.to_string()),
                    None,
                ));
            }
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
                request.id,
            ));
        }

        let is_notification = request.is_notification();
        let response = self.dispatch(&request);
        if is_notification {
            // Notifications never get responses, not even errors.
            return None;
        }
        Some(response)
    }

    fn dispatch(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
                id,
            ),
            "initialized" | "notifications/initialized" | "notifications/cancelled" => {
                // Notifications; dispatch result is discarded by the caller.
                JsonRpcResponse::success(Value::Null, id)
            }
            "ping" => JsonRpcResponse::success(json!({}), id),
            "list_tools" | "tools/list" => {
                JsonRpcResponse::success(json!({"tools": self.broker.tool_catalog()}), id)
            }
            "call_tool" | "tools/call" => {
                let params = request.params.clone().unwrap_or(Value::Null);
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return JsonRpcResponse::error(
                        JsonRpcError::invalid_params("missing tool name"),
                        id,
                    );
                };
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
                match self.broker.call_tool(name, &arguments) {
                    Ok(outcome) => JsonRpcResponse::success(
                        json!({
                            "content": [{"type": "text", "text": outcome.text}],
                            "isError": outcome.is_error,
                        }),
                        id,
                    ),
                    Err(ToolError::InvalidParams(msg)) => {
                        JsonRpcResponse::error(JsonRpcError::invalid_params(msg), id)
                    }
                    Err(ToolError::UnknownTool(name)) => JsonRpcResponse::error(
                        JsonRpcError::invalid_params(format!("unknown tool: {name}")),
                        id,
                    ),
                }
            }
            other => JsonRpcResponse::error(JsonRpcError::method_not_found(other), id),
        }
    }
}
