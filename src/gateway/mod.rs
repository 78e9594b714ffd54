//! Client for the remote tool host (an MCP gateway).
//!
//! [`ToolHost`] is the narrow transport seam; [`GatewayClient`] binds calls to
//! a [`Session`], normalizes results into [`ToolOutcome`]s, and keeps the
//! session's server bookkeeping in step with management calls.

pub mod management;
pub mod normalize;
pub mod transport;

pub use management::{is_dynamic_tool_name, ManagementTool, DYNAMIC_TOOL_PREFIX};
pub use transport::HttpToolHost;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::state::Session;
use crate::types::{ToolCallRequest, ToolKind, ToolOutcome, ToolSpec};
use crate::util::timeout::with_timeout;

use normalize::{normalize, NormalizeContext};

/// A tool as advertised by the tool host.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Contributing server, when the host reports it.
    pub server: Option<String>,
}

impl RemoteTool {
    pub(crate) fn from_wire(raw: &Value) -> Option<Self> {
        let name = raw.get("name")?.as_str()?.to_string();
        Some(Self {
            name,
            description: raw
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            input_schema: raw
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            server: raw
                .get("_meta")
                .and_then(|m| m.get("server"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Raw result of a `tools/call`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
    pub content: Vec<Value>,
    pub structured: Option<Value>,
    pub is_error: bool,
}

impl CallResult {
    pub(crate) fn from_wire(result: &Value) -> Self {
        Self {
            content: result
                .get("content")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            structured: result.get("structuredContent").cloned(),
            is_error: result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    /// Text items joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    /// Payload handed back to the model on success.
    pub fn into_payload(self) -> Value {
        if let Some(structured) = self.structured {
            return structured;
        }
        let text = self.text();
        if !text.is_empty() {
            return Value::String(text);
        }
        Value::Array(self.content)
    }
}

/// Transport to the tool host.
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Perform the protocol handshake and return a remote session handle.
    async fn open_session(&self) -> Result<String>;
    async fn list_tools(&self, remote: &str) -> Result<Vec<RemoteTool>>;
    async fn call_tool(&self, remote: &str, name: &str, arguments: Value) -> Result<CallResult>;

    /// Release a remote session. Hosts without per-session state ignore it.
    async fn close_session(&self, _remote: &str) -> Result<()> {
        Ok(())
    }
}

/// Session-aware gateway client.
#[derive(Clone)]
pub struct GatewayClient {
    host: Arc<dyn ToolHost>,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(host: Arc<dyn ToolHost>, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    /// Return the session's remote handle, connecting (and re-activating its
    /// servers) if there is none.
    pub async fn ensure_remote(&self, session: &mut Session) -> Result<String> {
        if let Some(ref remote) = session.remote_session {
            return Ok(remote.clone());
        }

        let remote = with_timeout(self.timeout, self.host.open_session()).await?;
        session.remote_session = Some(remote.clone());
        info!(session = %session.key, servers = session.active_servers.len(), "gateway session opened");

        for server in session.active_servers.clone() {
            let args = json!({"name": server, "activate": true});
            let restored = with_timeout(
                self.timeout,
                self.host.call_tool(&remote, ManagementTool::Add.name(), args),
            )
            .await;
            match restored {
                Ok(result) if !result.is_error => {
                    debug!(session = %session.key, server = %server, "server re-activated");
                }
                Ok(result) => {
                    warn!(session = %session.key, server = %server, reply = %result.text(), "server re-activation rejected");
                }
                Err(err) => {
                    warn!(session = %session.key, server = %server, error = %err, "server re-activation failed");
                }
            }
        }
        Ok(remote)
    }

    /// Release the session's remote handle, if it has one.
    pub async fn disconnect(&self, session: &mut Session) {
        let Some(remote) = session.remote_session.take() else {
            return;
        };
        if let Err(err) = with_timeout(self.timeout, self.host.close_session(&remote)).await {
            warn!(session = %session.key, error = %err, "could not close gateway session");
        }
    }

    /// Everything the host currently offers for this session, classified.
    pub async fn list_tools(&self, session: &mut Session) -> Result<Vec<ToolSpec>> {
        let remote = self.ensure_remote(session).await?;
        let listed = match with_timeout(self.timeout, self.host.list_tools(&remote)).await {
            Ok(listed) => listed,
            Err(err) => {
                self.forget_stale_remote(session, &err);
                return Err(err);
            }
        };
        Ok(listed
            .into_iter()
            .map(|tool| classify(tool, session))
            .collect())
    }

    /// Execute one tool call. Failures of any kind come back as outcomes.
    pub async fn invoke(&self, session: &mut Session, call: &ToolCallRequest) -> ToolOutcome {
        let remote = match self.ensure_remote(session).await {
            Ok(remote) => remote,
            Err(err) => return ToolOutcome::error(format!("tool host unavailable: {err}")),
        };
        let arguments = match coerce_tool_arguments(call.arguments.clone()) {
            Ok(arguments) => arguments,
            Err(err) => return ToolOutcome::error(err.to_string()),
        };

        let management = ManagementTool::from_name(&call.name);
        let server = target_server(management, call, &arguments, session);
        debug!(session = %session.key, tool = %call.name, server = %server, "invoking tool");

        let result = with_timeout(
            self.timeout,
            self.host.call_tool(&remote, &call.name, arguments.clone()),
        )
        .await;
        let outcome = match result {
            Ok(result) => normalize(
                &NormalizeContext {
                    tool: &call.name,
                    server: &server,
                    discovered: &session.discovered,
                },
                result,
            ),
            Err(BridgeError::Timeout(ms)) => {
                ToolOutcome::error(format!("tool '{}' timed out after {ms}ms", call.name))
            }
            Err(err) => {
                self.forget_stale_remote(session, &err);
                ToolOutcome::error(err.to_string())
            }
        };

        if outcome.is_success() {
            if let Some(tool) = management {
                self.record_management_success(session, tool, &server, &arguments, &outcome)
                    .await;
            }
        }
        outcome
    }

    async fn record_management_success(
        &self,
        session: &mut Session,
        tool: ManagementTool,
        server: &str,
        arguments: &Value,
        outcome: &ToolOutcome,
    ) {
        match tool {
            ManagementTool::Find => {
                if let ToolOutcome::Success { payload } = outcome {
                    let cached = cache_discovered(session, payload);
                    debug!(session = %session.key, cached, "discovery cache updated");
                }
            }
            ManagementTool::Add => {
                if session.activate(server) {
                    info!(session = %session.key, server, "server activated");
                }
                self.attribute_new_tools(session, server).await;
            }
            ManagementTool::Remove => {
                if session.deactivate(server) {
                    info!(session = %session.key, server, "server removed");
                }
            }
            ManagementTool::CodeMode => {
                if let Some(name) = arguments.get("name").and_then(Value::as_str) {
                    let tool_name = if is_dynamic_tool_name(name) {
                        name.to_string()
                    } else {
                        format!("{DYNAMIC_TOOL_PREFIX}{name}")
                    };
                    let servers = arguments
                        .get("servers")
                        .and_then(Value::as_array)
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    info!(session = %session.key, tool = %tool_name, "dynamic tool built");
                    session.dynamic_tools.insert(tool_name, servers);
                }
            }
            ManagementTool::Exec | ManagementTool::ConfigSet => {}
        }
    }

    /// Attribute every unattributed plain tool to the server just added.
    async fn attribute_new_tools(&self, session: &mut Session, server: &str) {
        let Some(remote) = session.remote_session.clone() else {
            return;
        };
        match with_timeout(self.timeout, self.host.list_tools(&remote)).await {
            Ok(listed) => {
                for tool in listed {
                    if ManagementTool::from_name(&tool.name).is_some()
                        || is_dynamic_tool_name(&tool.name)
                    {
                        continue;
                    }
                    let origin = tool.server.unwrap_or_else(|| server.to_string());
                    session.tool_origins.entry(tool.name).or_insert(origin);
                }
            }
            Err(err) => {
                warn!(session = %session.key, server, error = %err, "could not list tools after add");
            }
        }
    }

    fn forget_stale_remote(&self, session: &mut Session, err: &BridgeError) {
        if matches!(err, BridgeError::Api { status: 404, .. }) {
            warn!(session = %session.key, "gateway session expired; will reconnect");
            session.remote_session = None;
        }
    }
}

fn classify(tool: RemoteTool, session: &Session) -> ToolSpec {
    let kind = if ManagementTool::from_name(&tool.name).is_some() {
        ToolKind::Management
    } else if is_dynamic_tool_name(&tool.name) {
        ToolKind::Dynamic
    } else {
        ToolKind::User
    };
    let origin = tool
        .server
        .or_else(|| session.tool_origins.get(&tool.name).cloned());
    ToolSpec {
        name: tool.name,
        description: tool.description,
        parameters: tool.input_schema,
        origin,
        kind,
    }
}

/// Server a call is about: named in the arguments for management tools,
/// otherwise the tool's origin.
fn target_server(
    management: Option<ManagementTool>,
    call: &ToolCallRequest,
    arguments: &Value,
    session: &Session,
) -> String {
    let field = match management {
        Some(ManagementTool::Add) | Some(ManagementTool::Remove) | Some(ManagementTool::Exec) => {
            "name"
        }
        Some(ManagementTool::ConfigSet) => "server",
        _ => "",
    };
    arguments
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .or_else(|| session.tool_origins.get(&call.name).cloned())
        .unwrap_or_else(|| call.name.clone())
}

/// Cache the `servers` array of an `mcp-find` reply. Returns how many were cached.
fn cache_discovered(session: &mut Session, payload: &Value) -> usize {
    let parsed;
    let payload = match payload {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                parsed = value;
                &parsed
            }
            Err(_) => return 0,
        },
        other => other,
    };
    let mut cached = 0;
    for info in payload
        .get("servers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(name) = info.get("name").and_then(Value::as_str) {
            session.discovered.insert(name.to_string(), info.clone());
            cached += 1;
        }
    }
    cached
}

/// Models sometimes send arguments as a JSON string, or nothing at all.
fn coerce_tool_arguments(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(json!({})),
        Value::Object(map) => Ok(Value::Object(map)),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(json!({}));
            }
            let parsed: Value = serde_json::from_str(trimmed).map_err(|e| {
                BridgeError::InvalidArgument(format!("tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(BridgeError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}
