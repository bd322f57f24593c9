// src/llm/tools.rs
// Built-in tool definitions dispatched directly by the orchestrator, as
// opposed to `mcp__`-namespaced tools routed through the MCP Registry.

use crate::llm::provider::ToolDefinition;
use serde_json::json;

pub const RUN_COMMAND: &str = "run_command";
pub const UPDATE_HOST_NOTE: &str = "update_host_note";

pub fn builtin_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: RUN_COMMAND.to_string(),
            description: "Execute a shell command on a managed host, subject to policy.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "hostId": { "type": "string", "description": "Target host id" },
                    "command": { "type": "string", "description": "Shell command to run" },
                    "reasoning": { "type": "string", "description": "Why this command is being run" }
                },
                "required": ["hostId", "command"]
            }),
        },
        ToolDefinition {
            name: UPDATE_HOST_NOTE.to_string(),
            description: "Replace the persistent operational note for a host.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "hostId": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["hostId", "content"]
            }),
        },
    ]
}
