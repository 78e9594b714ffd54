//! Core run types for the agent loop.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::interrupt::{Interrupt, InterruptKind};
use crate::registry::Mode;
use crate::types::{ConfigRequirement, Conversation};

/// Settings a run needs that outlive one request (they travel with interrupts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunContext {
    pub model: String,
    pub provider: String,
    pub mode: Mode,
    pub iteration_limit: usize,
}

/// Why a run ended normally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum FinishReason {
    #[serde(rename = "stop")]
    #[strum(serialize = "stop")]
    Stop,
    #[serde(rename = "max-iterations")]
    #[strum(serialize = "max-iterations")]
    MaxIterations,
}

/// Final answer of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminalResponse {
    pub content: String,
    pub active_servers: Vec<String>,
    pub available_tools: Vec<String>,
    pub finish_reason: FinishReason,
}

/// Payload returned when a run suspends for operator input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptResponse {
    pub interrupt_type: InterruptKind,
    pub server: String,
    pub required_configs: Vec<ConfigRequirement>,
    pub conversation_state: Conversation,
    pub interrupt_id: String,
    pub instructions: String,
}

impl From<&Interrupt> for InterruptResponse {
    fn from(interrupt: &Interrupt) -> Self {
        Self {
            interrupt_type: interrupt.kind,
            server: interrupt.server.clone(),
            required_configs: interrupt.required_configs.clone(),
            conversation_state: interrupt.conversation.clone(),
            interrupt_id: interrupt.id.clone(),
            instructions: interrupt.instructions.clone(),
        }
    }
}

/// Result of a chat or resume request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChatResponse {
    Terminal(TerminalResponse),
    Interrupt(InterruptResponse),
}

impl ChatResponse {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupt(_))
    }

    pub fn as_terminal(&self) -> Option<&TerminalResponse> {
        match self {
            Self::Terminal(t) => Some(t),
            Self::Interrupt(_) => None,
        }
    }

    pub fn as_interrupt(&self) -> Option<&InterruptResponse> {
        match self {
            Self::Interrupt(i) => Some(i),
            Self::Terminal(_) => None,
        }
    }
}
