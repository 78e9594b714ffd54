//! Request-level facade: wires providers, the gateway, the registry, session
//! state and interrupts together for `chat`, `resume` and the management
//! surface.

pub mod prompts;
pub mod request;

pub use prompts::with_bridge_instructions;
pub use request::{ChatRequest, ResumeRequest};

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::agent_loop::{
    AgentLoop, ChatResponse, EventBuffer, EventEmitter, InterruptResponse, LoopEvent,
    LoopEventPayload, RunContext,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::gateway::{GatewayClient, HttpToolHost, ManagementTool, ToolHost};
use crate::interrupt::{InterruptManager, InterruptStore};
use crate::provider::{ModelProvider, ProviderRegistry};
use crate::registry::ToolRegistry;
use crate::state::{Session, SessionStore, StateManager};
use crate::types::{Conversation, Message, ToolCallRequest, ToolOutcome};

/// Servers and tools currently available to a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActiveServers {
    pub active_servers: Vec<String>,
    pub available_tools: Vec<String>,
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: usize,
    pub interrupts: usize,
}

/// Ordered run events for one streaming request.
///
/// Dropping the stream cancels the run at its next yield point.
pub struct EventStream {
    inner: UnboundedReceiverStream<LoopEvent>,
    _cancel: DropGuard,
}

impl Stream for EventStream {
    type Item = LoopEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// The orchestration engine.
pub struct Engine {
    config: BridgeConfig,
    providers: ProviderRegistry,
    gateway: GatewayClient,
    registry: ToolRegistry,
    state: StateManager,
    interrupts: InterruptManager,
}

impl Engine {
    /// Engine talking HTTP to the configured gateway, with in-memory stores.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let host = Arc::new(HttpToolHost::from_config(&config));
        Ok(Self::with_tool_host(config, host))
    }

    /// Engine over an arbitrary tool host, with in-memory stores.
    pub fn with_tool_host(config: BridgeConfig, host: Arc<dyn ToolHost>) -> Self {
        Self {
            providers: ProviderRegistry::with_builtin(),
            gateway: GatewayClient::new(host, config.gateway_timeout()),
            registry: ToolRegistry::new(),
            state: StateManager::in_memory(config.session_ttl()),
            interrupts: InterruptManager::in_memory(config.interrupt_ttl()),
            config,
        }
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.state = StateManager::new(store);
        self
    }

    pub fn with_interrupt_store(mut self, store: Arc<dyn InterruptStore>) -> Self {
        self.interrupts = InterruptManager::new(store, self.config.interrupt_ttl());
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn interrupts(&self) -> &InterruptManager {
        &self.interrupts
    }

    /// Run to completion or suspension and return the terminal payload.
    pub async fn chat(&self, user_id: &str, request: ChatRequest) -> Result<ChatResponse> {
        let buffer = EventBuffer::new();
        let emitter = EventEmitter::new(Some(buffer.sink()));
        self.run_chat(user_id, request, &emitter, &CancellationToken::new())
            .await?;
        buffer
            .collapse()
            .ok_or_else(|| BridgeError::InvalidState("run ended without a terminal event".into()))
    }

    /// Run in the background, delivering events as they happen.
    pub fn chat_stream(self: &Arc<Self>, user_id: &str, request: ChatRequest) -> EventStream {
        let engine = Arc::clone(self);
        let user_id = user_id.to_string();
        self.spawn_stream(move |emitter, cancel| async move {
            engine.run_chat(&user_id, request, &emitter, &cancel).await
        })
    }

    /// Continue a suspended run.
    pub async fn resume(&self, request: ResumeRequest) -> Result<ChatResponse> {
        let buffer = EventBuffer::new();
        let emitter = EventEmitter::new(Some(buffer.sink()));
        self.run_resume(request, &emitter, &CancellationToken::new())
            .await?;
        buffer
            .collapse()
            .ok_or_else(|| BridgeError::InvalidState("resume ended without a terminal event".into()))
    }

    /// Streaming variant of [`Engine::resume`].
    pub fn resume_stream(self: &Arc<Self>, request: ResumeRequest) -> EventStream {
        let engine = Arc::clone(self);
        self.spawn_stream(move |emitter, cancel| async move {
            engine.run_resume(request, &emitter, &cancel).await
        })
    }

    /// Search the tool host's server catalog.
    pub async fn discover(&self, user_id: &str, query: &str) -> Result<ToolOutcome> {
        let call = manual_call(ManagementTool::Find, json!({"query": query}));
        self.state
            .with_exclusive_session(user_id, user_id, |mut session| async move {
                let outcome = self.gateway.invoke(&mut session, &call).await;
                (session, Ok(outcome))
            })
            .await
    }

    /// Apply `config` to a server, then add it.
    pub async fn add_server(
        &self,
        user_id: &str,
        name: &str,
        activate: bool,
        config: Option<BTreeMap<String, Value>>,
    ) -> Result<ToolOutcome> {
        let call = manual_call(ManagementTool::Add, json!({"name": name, "activate": activate}));
        self.state
            .with_exclusive_session(user_id, user_id, |mut session| async move {
                if let Some(config) = config {
                    self.apply_configs(&mut session, name, &config).await;
                }
                let outcome = self.gateway.invoke(&mut session, &call).await;
                if outcome.is_success() {
                    self.refresh_catalog(&mut session).await;
                }
                (session, Ok(outcome))
            })
            .await
    }

    pub async fn remove_server(&self, user_id: &str, name: &str) -> Result<ToolOutcome> {
        let call = manual_call(ManagementTool::Remove, json!({"name": name}));
        self.state
            .with_exclusive_session(user_id, user_id, |mut session| async move {
                let outcome = self.gateway.invoke(&mut session, &call).await;
                if outcome.is_success() {
                    self.refresh_catalog(&mut session).await;
                }
                (session, Ok(outcome))
            })
            .await
    }

    pub async fn list_active(&self, user_id: &str) -> Result<ActiveServers> {
        let session = self.state.load(user_id, user_id).await?;
        Ok(ActiveServers {
            active_servers: session.active_servers.clone(),
            available_tools: session.tool_names(),
        })
    }

    /// Forget a session entirely and release its gateway session.
    pub async fn end_session(&self, user_id: &str) -> Result<()> {
        if let Some(mut session) = self.state.remove(user_id).await? {
            self.gateway.disconnect(&mut session).await;
        }
        info!(session = user_id, "session ended");
        Ok(())
    }

    /// Evict idle sessions (closing their gateway sessions) and drop expired
    /// interrupts.
    pub async fn purge_expired(&self) -> Result<PurgeReport> {
        let evicted = self.state.purge_expired().await?;
        for mut session in evicted.iter().cloned() {
            self.gateway.disconnect(&mut session).await;
        }
        let interrupts = self.interrupts.purge_expired().await?;
        Ok(PurgeReport {
            sessions: evicted.len(),
            interrupts,
        })
    }

    /// Run [`Engine::purge_expired`] every `cleanup_interval`. The task ends
    /// once the last strong reference to the engine is gone.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let period = self.config.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                match engine.purge_expired().await {
                    Ok(report) if report != PurgeReport::default() => {
                        info!(sessions = report.sessions, interrupts = report.interrupts, "stale state purged");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "maintenance pass failed"),
                }
            }
            debug!("maintenance stopped");
        })
    }

    fn spawn_stream<F, Fut>(&self, run: F) -> EventStream
    where
        F: FnOnce(Arc<EventEmitter>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<ChatResponse>> + Send + 'static,
    {
        let (emitter, events) = EventEmitter::channel();
        let emitter = Arc::new(emitter);
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();

        let run = run(Arc::clone(&emitter), cancel);
        tokio::spawn(async move {
            if let Err(err) = run.await {
                warn!(error = %err, "streamed run failed");
                emitter.emit(LoopEventPayload::Error {
                    message: err.to_string(),
                });
            }
        });

        EventStream {
            inner: events,
            _cancel: guard,
        }
    }

    async fn run_chat(
        &self,
        user_id: &str,
        request: ChatRequest,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        if request.max_iterations == Some(0) {
            return Err(BridgeError::InvalidArgument(
                "max_iterations must be at least 1".into(),
            ));
        }
        let ctx = RunContext {
            model: request
                .model
                .unwrap_or_else(|| self.config.default_model.clone()),
            provider: request
                .provider
                .unwrap_or_else(|| self.config.default_provider.clone()),
            mode: request.mode,
            iteration_limit: request
                .max_iterations
                .unwrap_or(self.config.max_iterations),
        };
        let provider = self
            .providers
            .create_provider(&ctx.provider, &ctx.model, &self.config)?;
        let conversation = with_bridge_instructions(request.messages, ctx.mode);
        let initial_servers = request.initial_servers;
        info!(
            session = user_id,
            provider = %ctx.provider,
            model = %ctx.model,
            mode = %ctx.mode,
            "chat started"
        );

        self.state
            .with_exclusive_session(user_id, user_id, |mut session| async move {
                let result = self
                    .chat_locked(
                        &mut session,
                        &ctx,
                        provider.as_ref(),
                        conversation,
                        &initial_servers,
                        emitter,
                        cancel,
                    )
                    .await;
                (session, result)
            })
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn chat_locked(
        &self,
        session: &mut Session,
        ctx: &RunContext,
        provider: &dyn ModelProvider,
        conversation: Conversation,
        initial_servers: &[String],
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        self.refresh_catalog(session).await;

        if !initial_servers.is_empty() {
            for server in initial_servers {
                self.add_initial_server(session, server).await;
            }
            self.refresh_catalog(session).await;
        }

        self.agent_loop(provider, emitter, cancel)
            .run(session, ctx, conversation, 0)
            .await
    }

    async fn add_initial_server(&self, session: &mut Session, server: &str) {
        if session.is_active(server) {
            return;
        }
        let call = manual_call(ManagementTool::Add, json!({"name": server, "activate": true}));
        match self.gateway.invoke(session, &call).await {
            ToolOutcome::Success { .. } => debug!(session = %session.key, server, "initial server added"),
            ToolOutcome::ConfigRequired { required_configs, .. } => warn!(
                session = %session.key,
                server,
                missing = required_configs.len(),
                "initial server needs configuration; skipped"
            ),
            ToolOutcome::Error { message } => {
                warn!(session = %session.key, server, error = %message, "initial server not added")
            }
        }
    }

    async fn run_resume(
        &self,
        request: ResumeRequest,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let interrupt = self.interrupts.open(&request.interrupt_id).await?;
        let mut ctx = interrupt.run.clone();
        if let Some(model) = request.model.clone() {
            ctx.model = model;
        }
        if let Some(provider) = request.provider.clone() {
            ctx.provider = provider;
        }
        let provider = self
            .providers
            .create_provider(&ctx.provider, &ctx.model, &self.config)?;
        info!(
            interrupt_id = %interrupt.id,
            session = %interrupt.session_key,
            provided = request.provided_configs.len(),
            "resume requested"
        );

        self.state
            .with_exclusive_session(
                &interrupt.session_key,
                &interrupt.user_id,
                |mut session| async move {
                    let result = self
                        .resume_locked(&mut session, &request, &ctx, provider.as_ref(), emitter, cancel)
                        .await;
                    (session, result)
                },
            )
            .await
    }

    async fn resume_locked(
        &self,
        session: &mut Session,
        request: &ResumeRequest,
        ctx: &RunContext,
        provider: &dyn ModelProvider,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        // Another resume may have won the session lock first.
        let interrupt = self.interrupts.open(&request.interrupt_id).await?;
        self.gateway.ensure_remote(session).await?;

        self.apply_configs(session, &interrupt.server, &request.provided_configs)
            .await;
        let missing: Vec<&str> = interrupt
            .required_configs
            .iter()
            .filter(|req| !request.provided_configs.contains_key(&req.key))
            .map(|req| req.key.as_str())
            .collect();
        if !missing.is_empty() {
            warn!(interrupt_id = %interrupt.id, missing = ?missing, "resume is missing requested configuration");
        }

        let retried = self.gateway.invoke(session, &interrupt.pending_call).await;
        if let ToolOutcome::ConfigRequired {
            required_configs,
            instructions,
            ..
        } = retried
        {
            let updated = self
                .interrupts
                .replace_requirements(&interrupt.id, required_configs, instructions)
                .await?;
            let response = InterruptResponse::from(&updated);
            emitter.emit(LoopEventPayload::Interrupt(response.clone()));
            return Ok(ChatResponse::Interrupt(response));
        }

        let interrupt = self.interrupts.consume(&interrupt.id).await?;
        self.refresh_catalog(session).await;

        let pending = &interrupt.pending_call;
        let replay = ToolCallRequest::new(
            format!("resume-{}", uuid::Uuid::new_v4()),
            pending.name.clone(),
            pending.arguments.clone(),
        );
        let mut conversation = interrupt.conversation.clone();
        conversation.push(Message::assistant_tool_calls(None, vec![replay.clone()]));
        emitter.emit(LoopEventPayload::ToolCall {
            call: replay.clone(),
        });
        conversation.push(Message::tool_result(&replay, retried.to_message_content()));
        emitter.emit(LoopEventPayload::ToolResult {
            call_id: replay.id.clone(),
            tool_name: replay.name.clone(),
            outcome: retried,
        });

        self.agent_loop(provider, emitter, cancel)
            .run(session, ctx, conversation, interrupt.iterations_used)
            .await
    }

    /// Send each provided value to the server through `mcp-config-set`.
    async fn apply_configs(&self, session: &mut Session, server: &str, configs: &BTreeMap<String, Value>) {
        for (key, value) in configs {
            let call = manual_call(
                ManagementTool::ConfigSet,
                json!({"server": server, "key": key, "value": value}),
            );
            match self.gateway.invoke(session, &call).await {
                ToolOutcome::Error { message } => {
                    warn!(session = %session.key, server, key = %key, error = %message, "config value rejected")
                }
                _ => debug!(session = %session.key, server, key = %key, "config value applied"),
            }
        }
    }

    /// Re-resolve the catalog. Falls back to the management tools when the
    /// host is unreachable and nothing is cached.
    async fn refresh_catalog(&self, session: &mut Session) {
        if let Err(err) = self.registry.resolve(&self.gateway, session).await {
            warn!(session = %session.key, error = %err, "tool catalog unavailable");
            if session.catalog.is_empty() {
                session.catalog = self.registry.management_tools().to_vec();
            }
        }
    }

    fn agent_loop<'a>(
        &'a self,
        provider: &'a dyn ModelProvider,
        emitter: &'a EventEmitter,
        cancel: &'a CancellationToken,
    ) -> AgentLoop<'a> {
        AgentLoop {
            provider,
            gateway: &self.gateway,
            registry: &self.registry,
            interrupts: &self.interrupts,
            emitter,
            cancel,
            generation_timeout: self.config.generation_timeout(),
        }
    }
}

fn manual_call(tool: ManagementTool, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(format!("manual-{}", uuid::Uuid::new_v4()), tool.name(), arguments)
}
