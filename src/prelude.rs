//! Convenience re-exports for common use.

pub use crate::agent_loop::{
    ChatResponse, FinishReason, InterruptResponse, LoopEvent, LoopEventPayload, TerminalResponse,
};
pub use crate::config::BridgeConfig;
pub use crate::engine::{
    ActiveServers, ChatRequest, Engine, EventStream, PurgeReport, ResumeRequest,
};
pub use crate::error::{BridgeError, Result};
pub use crate::gateway::ToolHost;
pub use crate::interrupt::{FileInterruptStore, InterruptStore};
pub use crate::provider::{ModelProvider, ProviderRegistry};
pub use crate::registry::Mode;
pub use crate::types::{
    ConfigRequirement, Message, Role, ToolCallRequest, ToolOutcome, ToolSpec, Usage,
};
