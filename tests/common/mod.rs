//! Shared test helpers: a scripted model provider and an in-process tool host.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use toolbridge::config::BridgeConfig;
use toolbridge::engine::{ChatRequest, Engine};
use toolbridge::error::{BridgeError, Result};
use toolbridge::gateway::{CallResult, RemoteTool, ToolHost};
use toolbridge::provider::{ModelProvider, ProviderFactory, ProviderRegistry, ProviderRequest};
use toolbridge::registry::Mode;
use toolbridge::types::{AssistantTurn, Message, ToolCallRequest, Usage};

pub const PROVIDER: &str = "scripted";
pub const MODEL: &str = "scripted-model";

/// What the provider saw on one generation.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// Queue of assistant turns shared by every provider the factory builds.
#[derive(Clone, Default)]
pub struct Script {
    turns: Arc<Mutex<VecDeque<AssistantTurn>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    repeat: Arc<Mutex<Option<AssistantTurn>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str) -> &Self {
        self.turns.lock().unwrap().push_back(AssistantTurn {
            content: Some(text.to_string()),
            tool_calls: vec![],
            usage: usage(),
        });
        self
    }

    pub fn push_call(&self, id: &str, name: &str, arguments: Value) -> &Self {
        self.push_calls(vec![ToolCallRequest::new(id, name, arguments)])
    }

    pub fn push_calls(&self, calls: Vec<ToolCallRequest>) -> &Self {
        self.turns.lock().unwrap().push_back(AssistantTurn {
            content: None,
            tool_calls: calls,
            usage: usage(),
        });
        self
    }

    /// Turn returned once the queue is empty (defaults to a plain "Done.").
    pub fn repeat_forever(&self, turn: AssistantTurn) {
        *self.repeat.lock().unwrap() = Some(turn);
    }

    /// Make every generation take `delay` before answering.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn factory(&self) -> Arc<dyn ProviderFactory> {
        Arc::new(ScriptedFactory {
            script: self.clone(),
        })
    }

    fn next(&self, request: &ProviderRequest<'_>) -> AssistantTurn {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
        });
        if let Some(turn) = self.turns.lock().unwrap().pop_front() {
            return turn;
        }
        self.repeat
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| AssistantTurn {
                content: Some("Done.".to_string()),
                tool_calls: vec![],
                usage: usage(),
            })
    }
}

fn usage() -> Usage {
    Usage {
        input_tokens: 10,
        output_tokens: 5,
        total_tokens: 15,
    }
}

struct ScriptedFactory {
    script: Script,
}

impl ProviderFactory for ScriptedFactory {
    fn provider_keys(&self) -> &[&str] {
        &[PROVIDER]
    }

    fn create(
        &self,
        _config: &BridgeConfig,
        _provider_key: &str,
        model_id: &str,
    ) -> std::result::Result<Box<dyn ModelProvider>, BridgeError> {
        Ok(Box::new(ScriptedProvider {
            model_id: model_id.to_string(),
            script: self.script.clone(),
        }))
    }
}

struct ScriptedProvider {
    model_id: String,
    script: Script,
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &ProviderRequest<'_>) -> std::result::Result<AssistantTurn, BridgeError> {
        let delay = *self.script.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.script.next(request))
    }
}

/// A server the fake host knows about.
#[derive(Debug, Clone)]
pub struct FakeServer {
    pub name: String,
    pub tools: Vec<String>,
    pub required_config: Vec<String>,
}

impl FakeServer {
    pub fn new(name: &str, tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            required_config: vec![],
        }
    }

    pub fn requiring(mut self, keys: &[&str]) -> Self {
        self.required_config = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

#[derive(Default)]
struct HostState {
    active: Vec<String>,
    configs: HashMap<String, HashMap<String, Value>>,
    dynamic: HashSet<String>,
    calls: Vec<(String, Value)>,
    sessions_opened: usize,
    closed: Vec<String>,
    delays: HashMap<String, Duration>,
}

/// In-process stand-in for the MCP gateway.
pub struct FakeToolHost {
    servers: Vec<FakeServer>,
    state: Mutex<HostState>,
}

const MANAGEMENT: [&str; 6] = [
    "mcp-find",
    "mcp-add",
    "mcp-remove",
    "code-mode",
    "mcp-exec",
    "mcp-config-set",
];

impl FakeToolHost {
    pub fn new(servers: Vec<FakeServer>) -> Arc<Self> {
        Arc::new(Self {
            servers,
            state: Mutex::new(HostState::default()),
        })
    }

    /// Every `tools/call` received, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }

    pub fn config_of(&self, server: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .configs
            .get(server)
            .and_then(|c| c.get(key))
            .cloned()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().unwrap().sessions_opened
    }

    /// Remote handles released through `close_session`.
    pub fn closed_sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().closed.clone()
    }

    /// Make calls to `tool` take `delay` before answering.
    pub fn slow_down(&self, tool: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(tool.to_string(), delay);
    }

    fn server(&self, name: &str) -> Option<&FakeServer> {
        self.servers.iter().find(|s| s.name == name)
    }

    fn owner_of(&self, tool: &str) -> Option<&FakeServer> {
        self.servers.iter().find(|s| s.tools.iter().any(|t| t == tool))
    }

    fn find(&self, arguments: &Value) -> CallResult {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let servers: Vec<Value> = self
            .servers
            .iter()
            .filter(|s| s.name.to_lowercase().contains(&query))
            .map(|s| {
                let mut info = json!({"name": s.name, "description": format!("{} MCP server", s.name)});
                if !s.required_config.is_empty() {
                    let properties: serde_json::Map<String, Value> = s
                        .required_config
                        .iter()
                        .map(|k| (k.clone(), json!({"type": "string", "description": format!("{k} for {}", s.name)})))
                        .collect();
                    info["config_schema"] = json!({
                        "type": "object",
                        "required": s.required_config,
                        "properties": properties,
                    });
                }
                info
            })
            .collect();
        text(&json!({"servers": servers}).to_string(), false)
    }

    fn add(&self, state: &mut HostState, arguments: &Value) -> CallResult {
        let name = arguments.get("name").and_then(Value::as_str).unwrap_or_default();
        let Some(server) = self.server(name) else {
            return text(&format!("Error: server '{name}' not found in catalog"), true);
        };
        let configured = state.configs.get(name);
        let missing: Vec<&str> = server
            .required_config
            .iter()
            .filter(|k| configured.map_or(true, |c| !c.contains_key(k.as_str())))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return text(
                &format!("Error: Missing required config ({})", missing.join(", ")),
                false,
            );
        }
        if !state.active.iter().any(|s| s == name) {
            state.active.push(name.to_string());
        }
        text(&format!("Successfully added server '{name}'"), false)
    }
}

fn text(body: &str, is_error: bool) -> CallResult {
    CallResult {
        content: vec![json!({"type": "text", "text": body})],
        structured: None,
        is_error,
    }
}

#[async_trait]
impl ToolHost for FakeToolHost {
    async fn open_session(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.sessions_opened += 1;
        Ok(format!("remote-{}", state.sessions_opened))
    }

    async fn list_tools(&self, _remote: &str) -> Result<Vec<RemoteTool>> {
        let state = self.state.lock().unwrap();
        let mut tools: Vec<RemoteTool> = MANAGEMENT
            .iter()
            .map(|name| remote_tool(name, "gateway management tool"))
            .collect();
        for server in self.servers.iter().filter(|s| state.active.contains(&s.name)) {
            for tool in &server.tools {
                tools.push(remote_tool(tool, &format!("{tool} from {}", server.name)));
            }
        }
        let mut dynamic: Vec<&String> = state.dynamic.iter().collect();
        dynamic.sort();
        for name in dynamic {
            tools.push(remote_tool(name, "script tool"));
        }
        Ok(tools)
    }

    async fn call_tool(&self, _remote: &str, name: &str, arguments: Value) -> Result<CallResult> {
        let delay = self.state.lock().unwrap().delays.get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push((name.to_string(), arguments.clone()));
        let result = match name {
            "mcp-find" => self.find(&arguments),
            "mcp-add" => self.add(&mut state, &arguments),
            "mcp-config-set" => {
                let server = arguments["server"].as_str().unwrap_or_default().to_string();
                let key = arguments["key"].as_str().unwrap_or_default().to_string();
                state
                    .configs
                    .entry(server)
                    .or_default()
                    .insert(key, arguments["value"].clone());
                text("Config value stored", false)
            }
            "mcp-remove" => {
                let server = arguments["name"].as_str().unwrap_or_default();
                state.active.retain(|s| s != server);
                text(&format!("Removed server '{server}'"), false)
            }
            "code-mode" => {
                let tool = format!("code-mode-{}", arguments["name"].as_str().unwrap_or_default());
                state.dynamic.insert(tool.clone());
                text(&format!("Created {tool}"), false)
            }
            "mcp-exec" => text("script finished", false),
            other => match self.owner_of(other) {
                Some(server) if state.active.contains(&server.name) => {
                    text(&format!("{other} result for {arguments}"), false)
                }
                _ => text(&format!("Error: tool '{other}' not found"), true),
            },
        };
        Ok(result)
    }

    async fn close_session(&self, remote: &str) -> Result<()> {
        self.state.lock().unwrap().closed.push(remote.to_string());
        Ok(())
    }
}

fn remote_tool(name: &str, description: &str) -> RemoteTool {
    RemoteTool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({"type": "object", "properties": {}}),
        server: None,
    }
}

/// Engine wired to the fake host and the scripted provider.
pub fn engine(host: Arc<FakeToolHost>, script: &Script) -> Engine {
    engine_with_config(host, script, BridgeConfig::default())
}

pub fn engine_with_config(host: Arc<FakeToolHost>, script: &Script, config: BridgeConfig) -> Engine {
    let mut providers = ProviderRegistry::new();
    providers.register(script.factory());
    Engine::with_tool_host(config, host).with_providers(providers)
}

pub fn chat_request(text: &str) -> ChatRequest {
    ChatRequest::builder()
        .messages(vec![Message::user(text)])
        .provider(PROVIDER)
        .model(MODEL)
        .mode(Mode::Dynamic)
        .build()
}

/// Catalog used by most scenarios.
pub fn standard_servers() -> Vec<FakeServer> {
    vec![
        FakeServer::new("duckduckgo", &["search", "fetch_content"]),
        FakeServer::new("arxiv-mcp-server", &["search_papers", "download_paper"])
            .requiring(&["storage_path"]),
        FakeServer::new("wikipedia", &["get_article"]),
    ]
}
