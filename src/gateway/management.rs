//! The fixed gateway-management tools.

use strum::{Display, EnumString, IntoStaticStr};

/// Management tools exposed by the gateway under fixed wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ManagementTool {
    #[strum(serialize = "mcp-find")]
    Find,
    #[strum(serialize = "mcp-add")]
    Add,
    #[strum(serialize = "mcp-remove")]
    Remove,
    #[strum(serialize = "code-mode")]
    CodeMode,
    #[strum(serialize = "mcp-exec")]
    Exec,
    #[strum(serialize = "mcp-config-set")]
    ConfigSet,
}

/// Name prefix the gateway gives tools built through `code-mode`.
pub const DYNAMIC_TOOL_PREFIX: &str = "code-mode-";

impl ManagementTool {
    pub const ALL: [ManagementTool; 6] = [
        Self::Find,
        Self::Add,
        Self::Remove,
        Self::CodeMode,
        Self::Exec,
        Self::ConfigSet,
    ];

    /// Wire name of the tool.
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Whether a successful call changes which tools exist in the session.
    pub fn mutates_registry(self) -> bool {
        matches!(self, Self::Add | Self::Remove | Self::CodeMode)
    }

    /// Tools that only the runtime may call.
    pub fn is_runtime_only(self) -> bool {
        matches!(self, Self::Remove | Self::ConfigSet)
    }
}

/// Whether `name` refers to a script tool built at runtime.
pub fn is_dynamic_tool_name(name: &str) -> bool {
    name.starts_with(DYNAMIC_TOOL_PREFIX)
}
