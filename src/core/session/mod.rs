//! Session State Machine.
//!
//! Owns the lifecycle of one live conversation and coordinates the
//! transport adapter, the upstream stream client and the tool bridge.
//! One session is a small set of cooperating tasks sharing nothing but the
//! session state, wired together with bounded channels:
//!
//! - the event dispatch loop, sole consumer of upstream events and the only
//!   writer of the barge-in flag;
//! - the inbound relay, forwarding client audio upstream;
//! - the outbound relay, forwarding synthesized audio to the client and
//!   draining it on barge-in;
//! - one short-lived task per tool invocation;
//! - the closer, which runs the ordered teardown exactly once no matter
//!   how many tasks request it.

pub mod prompt;
mod session;

pub use prompt::compose_system_prompt;
pub use session::{SessionArgs, SessionHandle, SessionRef};

use serde::Serialize;
use thiserror::Error;

use crate::core::speech::{AudioFrame, SpeechError};
use crate::core::transcript::TurnRole;

/// Session lifecycle. Transitions are one-directional; there is no path
/// back into `AudioActive` once closing has begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AudioActive,
    Closing,
    Closed,
}

/// Why a session is closing. The first detector wins; later requests are
/// no-ops.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// The client sent an explicit end signal.
    ClientEnd,
    /// The client connection dropped.
    ClientDisconnected,
    /// The connection sat idle past the configured limit.
    IdleTimeout,
    /// The upstream connection failed or misbehaved fatally.
    UpstreamError(String),
    /// The session broke the upstream protocol's ordering rules.
    ProtocolViolation(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::ClientEnd => write!(f, "client requested end"),
            CloseReason::ClientDisconnected => write!(f, "client disconnected"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::UpstreamError(message) => write!(f, "upstream error: {message}"),
            CloseReason::ProtocolViolation(message) => {
                write!(f, "protocol violation: {message}")
            }
        }
    }
}

/// Identity and tuning for one session, injected at creation.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub agent_id: String,
    pub actor_id: String,
    /// Sample rate the client's microphone frames arrive at.
    pub input_sample_rate_hz: u32,
    /// Capacity of the inbound and outbound audio queues.
    pub audio_queue_capacity: usize,
}

/// Notifications the session emits toward the transport adapter.
#[derive(Debug)]
pub enum SessionNotice {
    /// Handshake finished; the client may start streaming audio.
    Ready,
    /// Synthesized speech for the client.
    Audio(AudioFrame),
    /// A transcript line for either speaker.
    Transcript { role: TurnRole, content: String },
    /// The model asked for a tool invocation.
    ToolCall {
        tool: String,
        input: serde_json::Value,
    },
    /// A tool invocation finished and its result went upstream.
    ToolResult { tool: String, result: String },
    /// The user interrupted; the client should stop playback now.
    BargeIn,
    /// A fatal session error, surfaced before disconnect.
    Fault { message: String },
    /// Teardown finished; no further notices follow.
    Closed,
}

/// Errors from session startup and control operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("upstream handshake failed: {0}")]
    Handshake(SpeechError),

    #[error("upstream event stream unavailable")]
    EventsUnavailable,

    #[error("session is not active")]
    NotActive,

    #[error("upstream send failed: {0}")]
    Upstream(SpeechError),
}
