//! Tool catalog entries.

use serde::{Deserialize, Serialize};

/// Which partition of the catalog a tool belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Fixed gateway-management tools (discover, add, remove, ...).
    Management,
    /// Tools contributed by an active server.
    User,
    /// Script tools built at runtime through `code-mode`.
    Dynamic,
}

/// A tool the model may be offered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub kind: ToolKind,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        kind: ToolKind,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            origin: None,
            kind,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn is_management(&self) -> bool {
        self.kind == ToolKind::Management
    }
}

/// Names of the tools in a catalog, in catalog order.
pub fn tool_names(catalog: &[ToolSpec]) -> Vec<String> {
    catalog.iter().map(|spec| spec.name.clone()).collect()
}
