//! Client-facing voice protocol messages.
//!
//! Inbound, clients send either raw binary PCM frames, JSON messages, or
//! the plain-text `start_audio` / `stop_audio` commands. Outbound, the
//! gateway sends JSON messages plus raw binary audio frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Maximum allowed size for one base64 audio message (1 MB).
pub const MAX_AUDIO_MESSAGE_SIZE: usize = 1024 * 1024;

/// Incoming JSON messages from the client.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum VoiceIncomingMessage {
    /// Base64-encoded PCM audio.
    #[serde(rename = "audio")]
    Audio {
        /// Base64 PCM payload.
        data: String,
    },

    /// End the session.
    #[serde(rename = "end")]
    End,
}

/// Error type for message validation failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VoiceValidationError {
    #[error("audio message too large: {size} bytes (max: {max} bytes)")]
    AudioTooLarge { size: usize, max: usize },
}

impl VoiceIncomingMessage {
    /// Validates message field sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> Result<(), VoiceValidationError> {
        match self {
            VoiceIncomingMessage::Audio { data } => {
                let size = data.len();
                if size > MAX_AUDIO_MESSAGE_SIZE {
                    return Err(VoiceValidationError::AudioTooLarge {
                        size,
                        max: MAX_AUDIO_MESSAGE_SIZE,
                    });
                }
            }
            VoiceIncomingMessage::End => {}
        }
        Ok(())
    }
}

/// Outgoing JSON messages to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum VoiceOutgoingMessage {
    /// Session handshake finished; audio may flow.
    #[serde(rename = "ready")]
    Ready,

    /// Transcript line for either speaker.
    #[serde(rename = "transcript")]
    Transcript { role: String, content: String },

    /// The model asked for a tool invocation.
    #[serde(rename = "tool_call")]
    ToolCall {
        tool: String,
        input: serde_json::Value,
    },

    /// A tool invocation finished.
    #[serde(rename = "tool_result")]
    ToolResult { tool: String, result: String },

    /// The user interrupted; stop playback immediately.
    #[serde(rename = "barge_in")]
    BargeIn { message: String },

    /// Error message.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Message routing for the socket sender task.
pub enum VoiceMessageRoute {
    /// JSON text message
    Outgoing(VoiceOutgoingMessage),
    /// Binary audio data
    Audio(Bytes),
    /// Close connection
    Close,
}
