//! Voice session transport adapter: WebSocket handler and client protocol
//! messages.

pub mod handler;
pub mod messages;

pub use handler::voice_handler;
pub use messages::{VoiceIncomingMessage, VoiceMessageRoute, VoiceOutgoingMessage};
