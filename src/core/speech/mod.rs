//! Upstream Stream Client.
//!
//! Owns the single bidirectional connection to the speech-model service:
//! typed wire events, a transport seam for testing, and the stream client
//! with its dedicated reader and writer workers.

pub mod client;
pub mod config;
pub mod events;
pub mod transport;

pub use client::{SpeechSender, SpeechStreamClient};
pub use config::SpeechConfig;
pub use events::{
    ControlEvent, DecodeError, IncomingEvent, InferenceConfig, Role, ToolSpec, decode_event,
    is_interruption_marker,
};
pub use transport::{StreamSink, StreamSource, StreamTransport, WsTransport};

use bytes::Bytes;
use thiserror::Error;

/// Which way an audio frame is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDirection {
    /// Client microphone toward the speech service.
    Inbound,
    /// Synthesized speech toward the client.
    Outbound,
}

/// A chunk of raw PCM samples. Transient; never persisted.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pcm: Bytes,
    pub sample_rate_hz: u32,
    pub direction: AudioDirection,
}

/// Errors from the upstream stream client.
#[derive(Debug, Error)]
pub enum SpeechError {
    /// Could not reach or upgrade to the service endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Audio or control traffic attempted before the open handshake
    /// completed, or after close.
    #[error("stream not open")]
    NotOpen,

    /// The stream is already open.
    #[error("stream already open")]
    AlreadyOpen,

    /// The writer worker is gone; the connection is effectively closed.
    #[error("upstream send channel closed")]
    ChannelClosed,

    /// Transport-level failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Outgoing event could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configured endpoint is not a usable URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
