//! The bounded generate → dispatch → reconcile loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::gateway::{GatewayClient, ManagementTool};
use crate::interrupt::{Interrupt, InterruptManager};
use crate::provider::{ModelProvider, ProviderRequest};
use crate::registry::ToolRegistry;
use crate::state::Session;
use crate::types::{AssistantTurn, Conversation, Message, ToolOutcome, ToolSpec, Usage};
use crate::util::timeout::with_timeout;

use super::events::{EventEmitter, LoopEventPayload};
use super::types::{ChatResponse, FinishReason, InterruptResponse, RunContext, TerminalResponse};

/// Tool message recorded for calls that were never dispatched because an
/// earlier call in the same turn suspended the run.
pub const SKIPPED_TOOL_CONTENT: &str =
    "Skipped: an earlier tool call in this turn is waiting for configuration.";

/// Everything one run needs, borrowed for its duration.
pub struct AgentLoop<'a> {
    pub provider: &'a dyn ModelProvider,
    pub gateway: &'a GatewayClient,
    pub registry: &'a ToolRegistry,
    pub interrupts: &'a InterruptManager,
    pub emitter: &'a EventEmitter,
    pub cancel: &'a CancellationToken,
    pub generation_timeout: Duration,
}

impl AgentLoop<'_> {
    /// Drive the loop until it finishes, hits the iteration limit, or suspends.
    ///
    /// `start_iteration` is non-zero when continuing a resumed run.
    pub async fn run(
        &self,
        session: &mut Session,
        ctx: &RunContext,
        mut conversation: Conversation,
        start_iteration: usize,
    ) -> Result<ChatResponse> {
        let mut iteration = start_iteration;
        let mut accrued: Option<String> = None;
        let mut usage = Usage::default();

        loop {
            if iteration >= ctx.iteration_limit {
                info!(session = %session.key, iteration, "iteration limit reached");
                return Ok(self.finish(
                    session,
                    accrued.unwrap_or_default(),
                    FinishReason::MaxIterations,
                ));
            }
            if self.cancel.is_cancelled() {
                return Err(BridgeError::Canceled);
            }

            let tools = self.registry.filter(session, ctx.mode);
            debug!(session = %session.key, iteration, tools = tools.len(), "generating");
            let turn = self.generate(&conversation, &tools).await?;
            usage.merge(&turn.usage);

            if let Some(text) = turn.content.as_ref().filter(|t| !t.trim().is_empty()) {
                self.emitter
                    .emit(LoopEventPayload::Content { text: text.clone() });
                accrued = Some(text.clone());
            }

            if !turn.has_tool_calls() {
                debug!(
                    session = %session.key,
                    iterations = iteration + 1,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "run complete"
                );
                return Ok(self.finish(
                    session,
                    turn.content.unwrap_or_default(),
                    FinishReason::Stop,
                ));
            }

            conversation.push(turn.to_message());
            let mut registry_changed = false;

            for (index, call) in turn.tool_calls.iter().enumerate() {
                self.emitter
                    .emit(LoopEventPayload::ToolCall { call: call.clone() });
                let outcome = self.gateway.invoke(session, call).await;
                debug!(session = %session.key, tool = %call.name, status = outcome.tag(), "tool dispatched");

                conversation.push(Message::tool_result(call, outcome.to_message_content()));
                self.emitter.emit(LoopEventPayload::ToolResult {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    outcome: outcome.clone(),
                });

                match outcome {
                    ToolOutcome::ConfigRequired {
                        server,
                        required_configs,
                        instructions,
                    } => {
                        for skipped in &turn.tool_calls[index + 1..] {
                            conversation.push(Message::tool_result(skipped, SKIPPED_TOOL_CONTENT));
                        }
                        let interrupt = Interrupt::builder()
                            .session_key(session.key.clone())
                            .user_id(session.user_id.clone())
                            .server(server)
                            .required_configs(required_configs)
                            .instructions(instructions)
                            .conversation(conversation)
                            .pending_call(call.clone())
                            .run(ctx.clone())
                            .iterations_used(iteration + 1)
                            .build();
                        return self.suspend(interrupt).await;
                    }
                    ToolOutcome::Success { .. } => {
                        if ManagementTool::from_name(&call.name)
                            .is_some_and(ManagementTool::mutates_registry)
                        {
                            registry_changed = true;
                        }
                    }
                    ToolOutcome::Error { ref message } => {
                        warn!(session = %session.key, tool = %call.name, error = %message, "tool call failed");
                    }
                }
            }

            if registry_changed {
                if let Err(err) = self.registry.resolve(self.gateway, session).await {
                    warn!(session = %session.key, error = %err, "catalog refresh failed; keeping previous catalog");
                }
            }
            iteration += 1;
        }
    }

    async fn generate(&self, conversation: &[Message], tools: &[ToolSpec]) -> Result<AssistantTurn> {
        let request = ProviderRequest {
            messages: conversation,
            tools,
        };
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(BridgeError::Canceled),
            result = with_timeout(self.generation_timeout, self.provider.generate(&request)) => result,
        };
        result.map_err(|err| {
            let err = match err {
                BridgeError::Timeout(ms) => BridgeError::generation(
                    self.provider.provider_name(),
                    format!("no response within {ms}ms"),
                ),
                other => other,
            };
            warn!(
                provider = self.provider.provider_name(),
                model = self.provider.model_id(),
                error = %err,
                "generation failed"
            );
            err
        })
    }

    async fn suspend(&self, interrupt: Interrupt) -> Result<ChatResponse> {
        let response = InterruptResponse::from(&interrupt);
        self.interrupts.suspend(interrupt).await?;
        self.emitter
            .emit(LoopEventPayload::Interrupt(response.clone()));
        Ok(ChatResponse::Interrupt(response))
    }

    fn finish(&self, session: &Session, content: String, finish_reason: FinishReason) -> ChatResponse {
        let response = TerminalResponse {
            content,
            active_servers: session.active_servers.clone(),
            available_tools: session.tool_names(),
            finish_reason,
        };
        self.emitter.emit(LoopEventPayload::Done(response.clone()));
        ChatResponse::Terminal(response)
    }
}
