//! Per-session tool catalog: resolution against the gateway and exposure filtering.

pub mod schemas;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::info;

use crate::error::Result;
use crate::gateway::{GatewayClient, ManagementTool};
use crate::state::Session;
use crate::types::{ToolKind, ToolSpec};

/// Which tool surface the model works through.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Discover and add servers, call their tools directly.
    #[default]
    Dynamic,
    /// Build script tools over servers and execute them.
    Code,
}

/// Builds and filters session catalogs.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    management: Vec<ToolSpec>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            management: schemas::management_tools(),
        }
    }

    pub fn management_tools(&self) -> &[ToolSpec] {
        &self.management
    }

    /// Rebuild the session catalog from the gateway's current tool list.
    ///
    /// The catalog always starts with the management tools. Remote tools are
    /// kept when their origin server is active; a name already present is
    /// never added twice.
    pub async fn resolve(&self, gateway: &GatewayClient, session: &mut Session) -> Result<Vec<ToolSpec>> {
        let (before_mgmt, before_user) = partition_counts(&session.catalog);
        let remote = gateway.list_tools(session).await?;

        let catalog = self.merge(remote, session);
        let (after_mgmt, after_user) = partition_counts(&catalog);
        info!(
            session = %session.key,
            before_management = before_mgmt,
            before_user = before_user,
            after_management = after_mgmt,
            after_user = after_user,
            "tool catalog resolved"
        );
        session.catalog = catalog.clone();
        Ok(catalog)
    }

    fn merge(&self, remote: Vec<ToolSpec>, session: &Session) -> Vec<ToolSpec> {
        let mut catalog = self.management.clone();
        let mut seen: HashSet<String> = catalog.iter().map(|t| t.name.clone()).collect();

        for tool in remote {
            if seen.contains(&tool.name) {
                continue;
            }
            let keep = match tool.kind {
                ToolKind::Management => false,
                ToolKind::User => tool
                    .origin
                    .as_deref()
                    .is_some_and(|origin| session.is_active(origin)),
                ToolKind::Dynamic => session
                    .dynamic_tools
                    .get(&tool.name)
                    .map_or(true, |servers| servers.iter().all(|s| session.is_active(s))),
            };
            if keep {
                seen.insert(tool.name.clone());
                catalog.push(tool);
            }
        }
        catalog
    }

    /// The part of the session catalog the model may see in `mode`.
    pub fn filter(&self, session: &Session, mode: Mode) -> Vec<ToolSpec> {
        session
            .catalog
            .iter()
            .filter(|tool| is_exposed(tool, session, mode))
            .cloned()
            .collect()
    }
}

fn is_exposed(tool: &ToolSpec, session: &Session, mode: Mode) -> bool {
    match tool.kind {
        ToolKind::Management => match ManagementTool::from_name(&tool.name) {
            Some(m) if m.is_runtime_only() => false,
            Some(ManagementTool::CodeMode) | Some(ManagementTool::Exec) => mode == Mode::Code,
            Some(_) => true,
            None => false,
        },
        ToolKind::User => {
            mode == Mode::Dynamic
                && tool
                    .origin
                    .as_deref()
                    .is_some_and(|origin| session.is_active(origin))
        }
        ToolKind::Dynamic => mode == Mode::Code,
    }
}

fn partition_counts(catalog: &[ToolSpec]) -> (usize, usize) {
    let management = catalog.iter().filter(|t| t.is_management()).count();
    (management, catalog.len() - management)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn user_tool(name: &str, origin: &str) -> ToolSpec {
        ToolSpec::new(name, "", json!({"type": "object"}), ToolKind::User).with_origin(origin)
    }

    fn names(tools: &[ToolSpec]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn merge_keeps_management_first_and_wins_on_collision() {
        let registry = ToolRegistry::new();
        let mut session = Session::new("k", "u");
        session.activate("wikipedia");

        let remote = vec![
            ToolSpec::new("mcp-find", "remote copy", json!({}), ToolKind::Management),
            user_tool("mcp-add", "wikipedia"),
            user_tool("search", "wikipedia"),
            user_tool("search", "wikipedia"),
            user_tool("create_issue", "github"),
        ];
        let catalog = registry.merge(remote, &session);

        assert_eq!(
            names(&catalog),
            vec![
                "mcp-find",
                "mcp-add",
                "mcp-remove",
                "code-mode",
                "mcp-exec",
                "mcp-config-set",
                "search"
            ]
        );
        assert_eq!(catalog[1].kind, ToolKind::Management);
        assert_ne!(catalog[0].description, "remote copy");
    }

    #[test]
    fn dynamic_tools_follow_their_server_scope() {
        let registry = ToolRegistry::new();
        let mut session = Session::new("k", "u");
        session.activate("wikipedia");
        session
            .dynamic_tools
            .insert("code-mode-wiki".into(), vec!["wikipedia".into()]);
        session
            .dynamic_tools
            .insert("code-mode-gh".into(), vec!["github".into()]);

        let remote = vec![
            ToolSpec::new("code-mode-wiki", "", json!({}), ToolKind::Dynamic),
            ToolSpec::new("code-mode-gh", "", json!({}), ToolKind::Dynamic),
            ToolSpec::new("code-mode-legacy", "", json!({}), ToolKind::Dynamic),
        ];
        let catalog = registry.merge(remote, &session);
        assert!(catalog.iter().any(|t| t.name == "code-mode-wiki"));
        assert!(catalog.iter().any(|t| t.name == "code-mode-legacy"));
        assert!(!catalog.iter().any(|t| t.name == "code-mode-gh"));
    }

    #[test]
    fn dynamic_mode_hides_script_and_runtime_tools() {
        let registry = ToolRegistry::new();
        let mut session = Session::new("k", "u");
        session.activate("wikipedia");
        session.catalog = registry.merge(
            vec![
                user_tool("search", "wikipedia"),
                ToolSpec::new("code-mode-x", "", json!({}), ToolKind::Dynamic),
            ],
            &session,
        );

        let visible = registry.filter(&session, Mode::Dynamic);
        assert_eq!(names(&visible), vec!["mcp-find", "mcp-add", "search"]);
    }

    #[test]
    fn code_mode_shows_script_tools_only() {
        let registry = ToolRegistry::new();
        let mut session = Session::new("k", "u");
        session.activate("wikipedia");
        session.catalog = registry.merge(
            vec![
                user_tool("search", "wikipedia"),
                ToolSpec::new("code-mode-x", "", json!({}), ToolKind::Dynamic),
            ],
            &session,
        );

        let visible = registry.filter(&session, Mode::Code);
        assert_eq!(
            names(&visible),
            vec!["mcp-find", "mcp-add", "code-mode", "mcp-exec", "code-mode-x"]
        );
    }

    #[test]
    fn user_tools_of_inactive_servers_are_never_exposed() {
        let registry = ToolRegistry::new();
        let mut session = Session::new("k", "u");
        session.catalog = vec![user_tool("search", "wikipedia")];
        assert!(registry.filter(&session, Mode::Dynamic).is_empty());
    }

    #[test]
    fn mode_parses_from_lowercase() {
        assert_eq!("code".parse::<Mode>().unwrap(), Mode::Code);
        assert_eq!(Mode::Dynamic.to_string(), "dynamic");
        assert_eq!(serde_json::to_value(Mode::Code).unwrap(), json!("code"));
    }
}
