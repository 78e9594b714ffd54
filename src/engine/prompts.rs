//! Mode-specific instructions appended to the system prompt.

use crate::registry::Mode;
use crate::types::{Conversation, Message, Role};

/// Heading placed between the caller's system prompt and the bridge instructions.
pub const INSTRUCTIONS_HEADING: &str =
    "--- Your Additional Instructions for MCP Bridge Client ---";

const DYNAMIC_INSTRUCTIONS: &str = "\
You are a helpful assistant with access to MCP dynamic management tools.
You can discover and add MCP servers at runtime, but you cannot configure servers, manage secrets, or run code-mode tools.

Available management tools:
- `mcp-find`: search for MCP servers by query (e.g. \"github\", \"database\", \"wikipedia\").
- `mcp-add`: add and activate a discovered server.

Workflow:
1. When you need a capability that is not available, call `mcp-find` with a concise, specific query.
2. Pick the best server from the results and call `mcp-add` to activate it.
3. If the server needs configuration, the runtime pauses the conversation and asks the user for it.
4. Once the server is ready, its tools appear in your tool list. Use them to answer.

Rules:
- Prefer tools you already have before discovering new servers.
- Never try to supply configuration values or secrets yourself.";

const CODE_INSTRUCTIONS: &str = "\
You are a helpful assistant that can build and run JavaScript/TypeScript tools over MCP servers (code-mode).

Available tools:
- `mcp-find` / `mcp-add`: discover and activate servers.
- `code-mode`: create a script environment. Give a unique `name` (it is prefixed with `code-mode-`) and the `servers` whose tools become helper functions. Do not include source code here.
- `mcp-exec`: run a script in a code-mode tool. Pass the tool `name` and `arguments.script`.

Workflow:
1. Make sure the servers you need are active.
2. Call `code-mode`; read the returned helper documentation carefully.
3. Call `mcp-exec` with a short, deterministic script that uses only the helpers you need and returns its result.";

/// Instructions for `mode`.
pub fn bridge_instructions(mode: Mode) -> &'static str {
    match mode {
        Mode::Dynamic => DYNAMIC_INSTRUCTIONS,
        Mode::Code => CODE_INSTRUCTIONS,
    }
}

/// Append the bridge instructions to the first system message, or insert one.
pub fn with_bridge_instructions(mut messages: Conversation, mode: Mode) -> Conversation {
    let instructions = bridge_instructions(mode);
    match messages.iter_mut().find(|m| m.role == Role::System) {
        Some(system) => {
            let existing = system.text().trim_end().to_string();
            system.content = Some(format!("{existing}\n\n{INSTRUCTIONS_HEADING}\n\n{instructions}"));
        }
        None => messages.insert(0, Message::system(instructions)),
    }
    messages
}
