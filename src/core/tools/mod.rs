//! Tool Invocation Bridge.
//!
//! Executes tool-call requests emitted by the speech model against the
//! external agent backend. Failures are reported back into the conversation
//! as structured tool results; they never tear the session down.

pub mod backend;
pub mod bridge;

pub use backend::{AgentBackend, HttpAgentBackend};
pub use bridge::ToolBridge;

use std::time::Duration;

use thiserror::Error;

use crate::core::speech::events::{ToolInputSchema, ToolSpec};

/// Name of the default tool routed to the agent backend.
pub const ASK_AGENT_TOOL: &str = "ask_agent";

/// Errors from a tool invocation. All of them are recoverable from the
/// session's point of view.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The backend answered with an error payload.
    #[error("agent backend error: {0}")]
    Backend(String),

    /// The backend did not answer within the configured bound.
    #[error("tool invocation timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure reaching the backend.
    #[error("agent backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered something this gateway cannot interpret.
    #[error("unexpected agent backend response: {0}")]
    InvalidResponse(String),
}

/// The tool schema registered at prompt start: a single `ask_agent` tool
/// that forwards the user's query to the business-logic agent.
///
/// The description doubles as model guidance; silent tool calls are the
/// main failure mode of voice agents.
pub fn default_tool_schema() -> Vec<ToolSpec> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The user's question or request to pass to the agent"
            }
        },
        "required": ["query"]
    });

    vec![ToolSpec {
        name: ASK_AGENT_TOOL.to_string(),
        description: "IMPORTANT: This tool queries a specialized AI agent. \
            YOU MUST ALWAYS speak to the user BEFORE calling this tool. \
            Required workflow: 1) First, verbally tell the user you're checking \
            (e.g., 'Let me look that up for you'), 2) Then call this tool, \
            3) Finally, share the results. Never call this tool without first \
            speaking to the user - silence creates a poor user experience."
            .to_string(),
        input_schema: ToolInputSchema {
            json: schema.to_string(),
        },
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema_is_valid_json() {
        let tools = default_tool_schema();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, ASK_AGENT_TOOL);
        let schema: serde_json::Value = serde_json::from_str(&tools[0].input_schema.json).unwrap();
        assert_eq!(schema["required"][0], "query");
    }
}
