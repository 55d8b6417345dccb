pub mod session;
pub mod speech;
pub mod tools;
pub mod transcript;

// Re-export commonly used types for convenience
pub use session::{
    CloseReason, SessionArgs, SessionContext, SessionHandle, SessionNotice, SessionRef,
    SessionState,
};
pub use speech::{AudioDirection, AudioFrame, SpeechConfig, SpeechError, SpeechStreamClient};
pub use tools::{AgentBackend, HttpAgentBackend, ToolBridge, ToolError};
pub use transcript::{ConversationTurn, TranscriptLog, TranscriptStore, TurnRole};
