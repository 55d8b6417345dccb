//! Per-session tool bridge.
//!
//! Carries the session identity into each backend invocation and imposes
//! the gateway's own upper bound on invocation time, whatever the backend's
//! internal timeout is.

use std::sync::Arc;
use std::time::Duration;

use super::{ASK_AGENT_TOOL, AgentBackend, ToolError};

/// Bridge between tool-use events and the agent backend, scoped to one
/// session. Cheap to clone into per-invocation tasks.
#[derive(Clone)]
pub struct ToolBridge {
    backend: Arc<dyn AgentBackend>,
    agent_id: String,
    actor_id: String,
    session_id: String,
    timeout: Duration,
}

impl ToolBridge {
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        agent_id: impl Into<String>,
        actor_id: impl Into<String>,
        session_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            agent_id: agent_id.into(),
            actor_id: actor_id.into(),
            session_id: session_id.into(),
            timeout,
        }
    }

    /// Execute one tool invocation. A timeout counts as an invocation
    /// failure; the caller turns any `Err` into a structured error payload
    /// for the conversation.
    pub async fn invoke(
        &self,
        tool_name: &str,
        input: &serde_json::Value,
    ) -> Result<String, ToolError> {
        let query = extract_query(tool_name, input);
        tracing::info!(
            session_id = %self.session_id,
            tool = tool_name,
            "executing tool invocation"
        );

        match tokio::time::timeout(
            self.timeout,
            self.backend
                .invoke(&self.agent_id, &self.actor_id, &self.session_id, &query),
        )
        .await
        {
            Err(_) => Err(ToolError::Timeout(self.timeout)),
            Ok(result) => result,
        }
    }
}

/// Lift the backend query out of the tool input. `ask_agent` carries it in
/// its `query` field; any other tool is wrapped generically so unknown
/// tools still reach the backend instead of failing the call.
fn extract_query(tool_name: &str, input: &serde_json::Value) -> String {
    if tool_name.eq_ignore_ascii_case(ASK_AGENT_TOOL)
        && let Some(query) = input.get("query").and_then(|v| v.as_str())
    {
        return query.to_string();
    }
    format!("Use the {tool_name} tool with input: {input}")
}
