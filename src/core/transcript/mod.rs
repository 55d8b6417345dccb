//! Transcript/Event Sink.
//!
//! Accumulates conversation turns and tool-call records during a session
//! and flushes them to the persistence collaborator once at session close.

pub mod store;

pub use store::{ObjectStoreTranscripts, TranscriptStore};

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

/// Speaker role in a persisted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
            TurnRole::Tool => write!(f, "tool"),
        }
    }
}

/// One conversation turn. Never mutated after append.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Value>,
}

/// Summary statistics flushed alongside the turns.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub total_turns: usize,
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub tool_calls: usize,
    pub duration_seconds: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub session_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub session_end: Option<OffsetDateTime>,
}

/// Append-only record of one session's conversation.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLog {
    pub session_id: String,
    pub agent_id: String,
    pub actor_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub turns: Vec<ConversationTurn>,
}

impl TranscriptLog {
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            actor_id: actor_id.into(),
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            turns: Vec::new(),
        }
    }

    /// Append a speech turn.
    pub fn append(&mut self, role: TurnRole, content: impl Into<String>) {
        let content = content.into();
        tracing::debug!(role = %role, preview = %preview(&content), "transcript turn");
        self.turns.push(ConversationTurn {
            role,
            content,
            timestamp: OffsetDateTime::now_utc(),
            tool_name: None,
            tool_input: None,
        });
    }

    /// Append a tool-call record.
    pub fn append_tool_call(
        &mut self,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
        tool_output: impl Into<String>,
    ) {
        let tool_name = tool_name.into();
        tracing::debug!(tool = %tool_name, "transcript tool call");
        self.turns.push(ConversationTurn {
            role: TurnRole::Tool,
            content: tool_output.into(),
            timestamp: OffsetDateTime::now_utc(),
            tool_name: Some(tool_name),
            tool_input: Some(tool_input),
        });
    }

    /// Mark the session ended. Safe to call once from the close path.
    pub fn finish(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(OffsetDateTime::now_utc());
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let count = |role| self.turns.iter().filter(|t| t.role == role).count();
        SessionSummary {
            total_turns: self.turns.len(),
            user_turns: count(TurnRole::User),
            assistant_turns: count(TurnRole::Assistant),
            tool_calls: count(TurnRole::Tool),
            duration_seconds: self
                .ended_at
                .map(|end| (end - self.started_at).as_seconds_f64()),
            session_start: self.started_at,
            session_end: self.ended_at,
        }
    }
}

fn preview(content: &str) -> &str {
    let end = content
        .char_indices()
        .nth(80)
        .map(|(i, _)| i)
        .unwrap_or(content.len());
    &content[..end]
}

/// Errors from the persistence collaborator. Never fatal to a session; the
/// session has already ended by the time a flush runs.
#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("failed to encode transcript: {0}")]
    Encode(#[from] serde_json::Error),
}
