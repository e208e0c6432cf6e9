//! Sandbox broker: the tool catalog and its dispatch.
//!
//! The broker is the single entry point for external tool requests. It
//! validates arguments, routes each tool onto the session machinery,
//! formats results, and offers every execution -- successful or failed --
//! to the audit recorder.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::audit::AuditRecorder;
use crate::config::SandboxConfig;
use crate::interpreter::{ExecutionResult, Session};
use crate::session_manager::SessionManager;

/// Tag used for audit records of stateless executions.
const STATELESS_TAG: &str = "stateless";

/// Sentinel returned by `list_sessions` when none are live.
const NO_SESSIONS: &str = "No active sessions";

/// The fixed interface reference returned by `show_interface`.
const INTERFACE_REFERENCE: &str = include_str!("interface.txt");

/// Result of one tool call: the rendered text plus the error flag the
/// boundary surfaces as `isError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }
}

/// Why a tool call could not be dispatched at all (as opposed to an
/// execution that ran and failed, which is a successful dispatch).
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),
}

/// The sandbox broker.
pub struct Broker {
    config: Arc<SandboxConfig>,
    manager: SessionManager,
    audit: Option<AuditRecorder>,
}

impl Broker {
    /// Builds the broker; the audit recorder is created iff a record
    /// directory is configured.
    pub fn new(config: Arc<SandboxConfig>) -> Self {
        let audit = config.record_dir.as_ref().and_then(|dir| {
            match AuditRecorder::new(dir.clone()) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    tracing::warn!("audit recorder disabled: {e}");
                    None
                }
            }
        });
        Self {
            manager: SessionManager::new(config.clone()),
            config,
            audit,
        }
    }

    /// The tool catalog, as reported verbatim on `list_tools`. Session
    /// tools are hidden when sessions are disabled.
    pub fn tool_catalog(&self) -> Vec<Value> {
        let mut tools = vec![
            tool_spec(
                "execute_stateless",
                "Execute a code snippet in a fresh one-shot sandbox session.",
                json!({
                    "type": "object",
                    "properties": {
                        "code": {"type": "string", "description": "The code to execute"}
                    },
                    "required": ["code"]
                }),
            ),
            tool_spec(
                "show_interface",
                "Show the reference for the sandboxed capability surface.",
                json!({"type": "object", "properties": {}}),
            ),
        ];

        if self.config.sessions_enabled {
            tools.push(tool_spec(
                "create_session",
                "Create a persistent sandbox session and return its id.",
                json!({"type": "object", "properties": {}}),
            ));
            tools.push(tool_spec(
                "execute_in_session",
                "Execute a code snippet in an existing session, keeping its state.",
                json!({
                    "type": "object",
                    "properties": {
                        "session_id": {"type": "string"},
                        "code": {"type": "string"}
                    },
                    "required": ["session_id", "code"]
                }),
            ));
            tools.push(tool_spec(
                "delete_session",
                "Delete a sandbox session.",
                json!({
                    "type": "object",
                    "properties": {"session_id": {"type": "string"}},
                    "required": ["session_id"]
                }),
            ));
            tools.push(tool_spec(
                "list_sessions",
                "List the ids of the live sandbox sessions.",
                json!({"type": "object", "properties": {}}),
            ));
        }

        tools
    }

    /// Dispatches one tool call.
    pub fn call_tool(&mut self, name: &str, arguments: &Value) -> Result<ToolOutcome, ToolError> {
        match name {
            "execute_stateless" => {
                let code = required_str(arguments, "code")?;
                let mut session = Session::one_shot(self.config.clone());
                let result = session.execute(code);
                self.offer_audit(code, STATELESS_TAG, &result);
                Ok(render(result))
            }
            "show_interface" => Ok(ToolOutcome::ok(INTERFACE_REFERENCE)),
            "create_session" if self.config.sessions_enabled => {
                Ok(ToolOutcome::ok(self.manager.create()))
            }
            "execute_in_session" if self.config.sessions_enabled => {
                let session_id = required_str(arguments, "session_id")?;
                let code = required_str(arguments, "code")?;
                let result = self
                    .manager
                    .execute_in(session_id, code)
                    .map_err(|e| ToolError::InvalidParams(e.to_string()))?;
                self.offer_audit(code, session_id, &result);
                Ok(render(result))
            }
            "delete_session" if self.config.sessions_enabled => {
                let session_id = required_str(arguments, "session_id")?;
                if self.manager.delete(session_id) {
                    Ok(ToolOutcome::ok(format!("Session deleted: {session_id}")))
                } else {
                    Ok(ToolOutcome {
                        text: format!("Session not found: {session_id}"),
                        is_error: true,
                    })
                }
            }
            "list_sessions" if self.config.sessions_enabled => {
                let ids = self.manager.list();
                if ids.is_empty() {
                    Ok(ToolOutcome::ok(NO_SESSIONS))
                } else {
                    Ok(ToolOutcome::ok(ids.join("\n")))
                }
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    fn offer_audit(&self, code: &str, session_id: &str, result: &ExecutionResult) {
        if let Some(audit) = &self.audit {
            audit.record(code, session_id, result);
        }
    }
}

fn tool_spec(name: &str, description: &str, input_schema: Value) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": input_schema,
    })
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidParams(format!("missing required argument: {key}")))
}

/// Shared result-formatting rule for stateless and in-session execution.
fn render(result: ExecutionResult) -> ToolOutcome {
    let text = match (result.output.is_empty(), result.error.as_deref()) {
        (false, Some(error)) => format!("{}\n\nError: {error}", result.output),
        (true, Some(error)) => format!("Error: {error}"),
        (false, None) => result.output.clone(),
        (true, None) => "(no output)".to_string(),
    };
    ToolOutcome {
        text,
        is_error: !result.success,
    }
}
