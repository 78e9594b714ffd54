//! Turns raw tool-host results into [`ToolOutcome`]s.
//!
//! The gateway reports missing configuration and missing secrets as plain
//! text inside an otherwise successful result, so both are recognised here
//! before the generic error flag is consulted.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::types::{ConfigRequirement, ToolOutcome};

use super::management::ManagementTool;
use super::CallResult;

const FALLBACK_DESCRIPTION: &str = "Configuration value required";

const SECRETS_PATTERN: &str = r"(?i)missing required secrets\s*\(([^)]+)\)";
const CONFIG_PATTERN: &str = r"(?i)missing required config\s*\(([^)]+)\)";

static SECRETS: OnceLock<Option<Regex>> = OnceLock::new();
static CONFIG: OnceLock<Option<Regex>> = OnceLock::new();

/// Keys in the parenthesised list `pattern` captures from `text`. A pattern
/// that fails to compile never matches.
fn missing_keys(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
    text: &str,
) -> Option<Vec<String>> {
    let regex = cell
        .get_or_init(|| {
            Regex::new(pattern)
                .map_err(|err| warn!(pattern, error = %err, "pattern did not compile"))
                .ok()
        })
        .as_ref()?;
    regex.captures(text).map(|captures| split_keys(&captures[1]))
}

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

/// Inputs that shape normalization besides the raw result.
pub struct NormalizeContext<'a> {
    pub tool: &'a str,
    /// Server the call targets (the add target, or the tool's origin).
    pub server: &'a str,
    /// Discovery cache: server name to the record returned by `mcp-find`.
    pub discovered: &'a HashMap<String, Value>,
}

/// Normalize one `tools/call` result.
pub fn normalize(ctx: &NormalizeContext<'_>, result: CallResult) -> ToolOutcome {
    let text = result.text();

    if let Some(outcome) = structured_config_required(ctx, &result, &text) {
        return outcome;
    }

    if let Some(secrets) = missing_keys(&SECRETS, SECRETS_PATTERN, &text) {
        return ToolOutcome::error(format!(
            "Server '{}' is missing required secrets ({}). Secrets must be provisioned on the tool host.",
            ctx.server,
            secrets.join(", ")
        ));
    }

    if let Some(named) = missing_keys(&CONFIG, CONFIG_PATTERN, &text) {
        return ToolOutcome::ConfigRequired {
            server: ctx.server.to_string(),
            required_configs: requirements_for(ctx.server, ctx.discovered, &named),
            instructions: text,
        };
    }

    if result.is_error {
        let message = if text.is_empty() {
            result
                .structured
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| format!("tool '{}' returned an error result", ctx.tool))
        } else {
            text
        };
        return ToolOutcome::error(message);
    }

    if ManagementTool::from_name(ctx.tool) == Some(ManagementTool::Add)
        && !text.to_lowercase().contains("successfully")
    {
        let message = if text.is_empty() {
            format!("server '{}' could not be added", ctx.server)
        } else {
            text
        };
        return ToolOutcome::error(message);
    }

    ToolOutcome::success(result.into_payload())
}

/// A `{"status": "config_required", ...}` object, either structured or as JSON text.
fn structured_config_required(
    ctx: &NormalizeContext<'_>,
    result: &CallResult,
    text: &str,
) -> Option<ToolOutcome> {
    let parsed;
    let payload = match result.structured {
        Some(ref value) => value,
        None => {
            parsed = serde_json::from_str::<Value>(text).ok()?;
            &parsed
        }
    };
    if payload.get("status").and_then(Value::as_str) != Some("config_required") {
        return None;
    }

    let server = payload
        .get("server")
        .and_then(Value::as_str)
        .unwrap_or(ctx.server)
        .to_string();
    let mut required: Vec<ConfigRequirement> = payload
        .get("required_configs")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    if required.is_empty() {
        required = requirements_for(&server, ctx.discovered, &[]);
    }
    let instructions = payload
        .get("instructions")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| text.to_string());

    Some(ToolOutcome::ConfigRequired {
        server,
        required_configs: required,
        instructions,
    })
}

/// Requirement list for `server`, preferring the discovered config schema.
pub fn requirements_for(
    server: &str,
    discovered: &HashMap<String, Value>,
    named: &[String],
) -> Vec<ConfigRequirement> {
    let from_schema = discovered
        .get(server)
        .and_then(|info| info.get("config_schema"))
        .map(schema_requirements)
        .unwrap_or_default();
    if !from_schema.is_empty() {
        return from_schema;
    }

    if named.is_empty() {
        return vec![ConfigRequirement::new(
            "unknown",
            "string",
            "This server requires configuration, but no config schema was returned.",
        )];
    }
    named
        .iter()
        .map(|key| ConfigRequirement::new(key.clone(), "string", FALLBACK_DESCRIPTION))
        .collect()
}

fn schema_requirements(schema: &Value) -> Vec<ConfigRequirement> {
    let schemas: Vec<&Value> = match schema {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut out = Vec::new();
    for schema in schemas {
        let properties = schema.get("properties");
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str);
        for key in required {
            let prop = properties.and_then(|p| p.get(key));
            let kind = prop
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("string");
            let description = prop
                .and_then(|p| p.get("description"))
                .and_then(Value::as_str)
                .unwrap_or(FALLBACK_DESCRIPTION);
            if out.iter().any(|r: &ConfigRequirement| r.key == key) {
                continue;
            }
            out.push(ConfigRequirement::new(key, kind, description));
        }
    }
    out
}
