//! Streamable-HTTP transport to the MCP gateway, built on `rmcp`.

use std::collections::HashMap;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, ClientInfo, JsonObject, ProtocolVersion};
use rmcp::service::{
    ClientInitializeError, DynService, Peer, RoleClient, RunningService, ServiceError, ServiceExt,
};
use rmcp::transport::StreamableHttpClientTransport;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

use super::{CallResult, RemoteTool, ToolHost};

type GatewayService = RunningService<RoleClient, Box<dyn DynService<RoleClient>>>;

/// Tool host reached over MCP streamable HTTP.
///
/// Each `open_session` runs its own `rmcp` client; the returned handle keys it.
pub struct HttpToolHost {
    url: String,
    protocol_version: ProtocolVersion,
    services: Mutex<HashMap<String, GatewayService>>,
}

impl HttpToolHost {
    pub fn new(url: impl Into<String>, protocol_version: &str) -> Self {
        Self {
            url: url.into(),
            protocol_version: parse_protocol_version(protocol_version),
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.gateway_url.clone(), &config.protocol_version)
    }

    async fn connect(
        &self,
        protocol_version: ProtocolVersion,
    ) -> std::result::Result<GatewayService, ClientInitializeError> {
        let client_info = ClientInfo {
            protocol_version,
            ..Default::default()
        };
        let transport = StreamableHttpClientTransport::from_uri(self.url.clone());
        client_info.into_dyn().serve(transport).await
    }

    async fn connect_with_protocol_fallback(&self) -> Result<GatewayService> {
        match self.connect(self.protocol_version.clone()).await {
            Ok(service) => return Ok(service),
            Err(error) if should_retry_protocol_fallback(&error) => {
                warn!(error = %error, "gateway rejected protocol version; retrying with 2024-11-05");
            }
            Err(error) => return Err(map_initialize_error(error)),
        }
        self.connect(ProtocolVersion::V_2024_11_05)
            .await
            .map_err(map_initialize_error)
    }

    /// Peer for a live handle. Closed or unknown handles report 404 so the
    /// caller reconnects.
    async fn peer(&self, remote: &str) -> Result<Peer<RoleClient>> {
        let mut services = self.services.lock().await;
        let closed = match services.get(remote) {
            Some(service) if !service.is_closed() => return Ok(service.peer().clone()),
            Some(_) => true,
            None => false,
        };
        if closed {
            services.remove(remote);
            return Err(BridgeError::api(404, format!("gateway session {remote} is closed")));
        }
        Err(BridgeError::api(404, format!("unknown gateway session {remote}")))
    }

    /// Drop a handle whose transport failed so the next call reconnects.
    async fn discard_if_closed(&self, remote: &str, error: &ServiceError) {
        if matches!(error, ServiceError::TransportClosed | ServiceError::TransportSend(_)) {
            self.services.lock().await.remove(remote);
        }
    }
}

#[async_trait]
impl ToolHost for HttpToolHost {
    async fn open_session(&self) -> Result<String> {
        let service = self.connect_with_protocol_fallback().await?;
        let handle = Uuid::new_v4().to_string();
        let server = service
            .peer_info()
            .map(|info| info.server_info.name.to_string())
            .unwrap_or_default();
        self.services.lock().await.insert(handle.clone(), service);
        info!(remote = %handle, server = %server, "gateway session initialized");
        Ok(handle)
    }

    async fn list_tools(&self, remote: &str) -> Result<Vec<RemoteTool>> {
        let peer = self.peer(remote).await?;
        let listed = match peer.list_all_tools().await {
            Ok(tools) => Ok(tools),
            Err(ServiceError::UnexpectedResponse) => {
                peer.list_tools(None).await.map(|page| page.tools)
            }
            Err(error) => Err(error),
        };
        let listed = match listed {
            Ok(listed) => listed,
            Err(error) => {
                self.discard_if_closed(remote, &error).await;
                return Err(map_service_error("tools/list", error));
            }
        };

        let tools: Vec<RemoteTool> = listed
            .iter()
            .filter_map(|tool| serde_json::to_value(tool).ok())
            .filter_map(|raw| RemoteTool::from_wire(&raw))
            .collect();
        debug!(count = tools.len(), "gateway tools listed");
        Ok(tools)
    }

    async fn call_tool(&self, remote: &str, name: &str, arguments: Value) -> Result<CallResult> {
        let arguments = tool_arguments(arguments)?;
        let peer = self.peer(remote).await?;
        let result = peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await;
        match result {
            Ok(result) => Ok(map_call_result(result)),
            Err(error) => {
                self.discard_if_closed(remote, &error).await;
                Err(map_service_error("tools/call", error))
            }
        }
    }

    async fn close_session(&self, remote: &str) -> Result<()> {
        let Some(service) = self.services.lock().await.remove(remote) else {
            return Ok(());
        };
        if let Err(err) = service.cancel().await {
            warn!(remote, error = %err, "gateway session did not shut down cleanly");
        }
        debug!(remote, "gateway session closed");
        Ok(())
    }
}

/// Configured version, or the newest `rmcp` knows when it cannot be parsed.
fn parse_protocol_version(raw: &str) -> ProtocolVersion {
    serde_json::from_value(Value::String(raw.trim().to_string())).unwrap_or_else(|err| {
        warn!(version = raw, error = %err, "unrecognized protocol version; using latest");
        ProtocolVersion::LATEST
    })
}

fn tool_arguments(arguments: Value) -> Result<Option<JsonObject>> {
    match arguments {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(BridgeError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn map_call_result(result: CallToolResult) -> CallResult {
    CallResult {
        content: result
            .content
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect(),
        structured: result.structured_content,
        is_error: result.is_error.unwrap_or(false),
    }
}

fn should_retry_protocol_fallback(error: &ClientInitializeError) -> bool {
    match error {
        ClientInitializeError::JsonRpcError(error) => {
            let message = error.message.to_ascii_lowercase();
            message.contains("protocol") && message.contains("version")
        }
        _ => false,
    }
}

fn map_initialize_error(error: ClientInitializeError) -> BridgeError {
    match error {
        ClientInitializeError::JsonRpcError(error) => BridgeError::Gateway {
            code: i64::from(error.code.0),
            message: error.message.to_string(),
        },
        ClientInitializeError::ConnectionClosed(context) => {
            BridgeError::Protocol(format!("initialize: connection closed ({context})"))
        }
        ClientInitializeError::TransportError { error, context } => {
            BridgeError::Protocol(format!("initialize: transport error ({context}): {error}"))
        }
        ClientInitializeError::Cancelled => BridgeError::Canceled,
        other => BridgeError::Protocol(format!("initialize: {other}")),
    }
}

fn map_service_error(context: &str, error: ServiceError) -> BridgeError {
    match error {
        ServiceError::McpError(error) => BridgeError::Gateway {
            code: i64::from(error.code.0),
            message: error.message.to_string(),
        },
        ServiceError::TransportSend(error) => {
            BridgeError::Protocol(format!("{context}: transport send failed: {error}"))
        }
        ServiceError::TransportClosed => BridgeError::Protocol(format!("{context}: transport closed")),
        ServiceError::UnexpectedResponse => {
            BridgeError::Protocol(format!("{context}: unexpected response"))
        }
        ServiceError::Cancelled { reason } => BridgeError::Protocol(format!(
            "{context}: request cancelled{}",
            reason.map(|r| format!(" ({r})")).unwrap_or_default()
        )),
        ServiceError::Timeout { timeout } => BridgeError::Timeout(timeout.as_millis() as u64),
        other => BridgeError::Protocol(format!("{context}: {other}")),
    }
}
