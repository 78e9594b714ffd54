//! Curated definitions of the management tools shown to models.

use serde_json::{json, Value};

use crate::gateway::ManagementTool;
use crate::types::{ToolKind, ToolSpec};

fn description(tool: ManagementTool) -> &'static str {
    match tool {
        ManagementTool::Find => {
            "Search the MCP server catalog by name, title, or description."
        }
        ManagementTool::Add => {
            "Add an MCP server from the catalog to this session and activate its tools."
        }
        ManagementTool::Remove => "Remove an MCP server from this session.",
        ManagementTool::CodeMode => {
            "Create a code-mode tool whose JavaScript environment exposes helper functions for the listed servers."
        }
        ManagementTool::Exec => "Run a script inside a code-mode tool.",
        ManagementTool::ConfigSet => "Set one configuration value for one server.",
    }
}

fn parameters(tool: ManagementTool) -> Value {
    match tool {
        ManagementTool::Find => json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query to find MCP servers by name, title, or description. Be specific (e.g. \"wikipedia\", \"github\", \"filesystem\")."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results to return",
                    "default": 10
                }
            },
            "additionalProperties": false
        }),
        ManagementTool::Add => json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the MCP server to add (must exist in the catalog)"
                },
                "activate": {
                    "type": "boolean",
                    "description": "Activate all of the server's tools in the current session",
                    "default": true
                }
            },
            "additionalProperties": false
        }),
        ManagementTool::Remove => json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string", "description": "Name of the server to remove"}
            },
            "additionalProperties": false
        }),
        ManagementTool::CodeMode => json!({
            "type": "object",
            "required": ["name", "servers"],
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Unique identifier for the tool; it is prefixed with 'code-mode-'."
                },
                "servers": {
                    "type": "array",
                    "description": "MCP servers whose tools become helper functions in the script environment.",
                    "items": {"type": "string"},
                    "minItems": 1
                },
                "timeout": {
                    "type": "integer",
                    "description": "Execution timeout in seconds",
                    "default": 30
                }
            },
            "additionalProperties": false
        }),
        ManagementTool::Exec => json!({
            "type": "object",
            "required": ["name", "arguments"],
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Code-mode tool to run (starts with 'code-mode-')."
                },
                "arguments": {
                    "type": "object",
                    "required": ["script"],
                    "properties": {
                        "script": {
                            "type": "string",
                            "description": "JavaScript/TypeScript to execute. Use \"return\" to return results."
                        }
                    },
                    "additionalProperties": false
                }
            },
            "additionalProperties": false
        }),
        ManagementTool::ConfigSet => json!({
            "type": "object",
            "required": ["server", "key", "value"],
            "properties": {
                "server": {"type": "string"},
                "key": {"type": "string"},
                "value": {}
            },
            "additionalProperties": false
        }),
    }
}

/// Definition of one management tool.
pub fn management_spec(tool: ManagementTool) -> ToolSpec {
    ToolSpec::new(
        tool.name(),
        description(tool),
        parameters(tool),
        ToolKind::Management,
    )
}

/// All management tools, in fixed order.
pub fn management_tools() -> Vec<ToolSpec> {
    ManagementTool::ALL.into_iter().map(management_spec).collect()
}
