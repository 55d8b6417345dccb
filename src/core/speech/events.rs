//! Speech-service wire event types.
//!
//! Every frame on the upstream connection is a JSON envelope of the form
//! `{"event": {"<kind>": {...}}}` with camelCase keys. Audio rides inside
//! the envelope as base64-encoded LPCM.
//!
//! # Protocol Overview
//!
//! Control events (sent to the service):
//! - sessionStart - Open the session with inference parameters
//! - promptStart - Declare output configurations and the tool schema
//! - contentStart / textInput / audioInput / toolResult / contentEnd -
//!   bracketed content blocks (TEXT, AUDIO, or TOOL)
//! - promptEnd / sessionEnd - Ordered teardown
//!
//! Incoming events (received from the service):
//! - textOutput - Transcript text (also carries the interruption marker)
//! - audioOutput - Base64 audio chunk
//! - toolUse - Tool invocation request
//! - contentEnd - A content block closed
//!
//! Incoming frames decode into [`IncomingEvent`]; kinds the session does not
//! act on are skipped, and genuinely unknown kinds surface as
//! [`IncomingEvent::Unparsed`] so protocol drift is visible in logs instead
//! of being silently tolerated.

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{AudioDirection, AudioFrame};

/// Event kinds the service emits for its own bookkeeping. The session does
/// not act on them, so they are skipped at trace level rather than warned.
const BOOKKEEPING_KINDS: &[&str] = &[
    "contentStart",
    "completionStart",
    "completionEnd",
    "usageEvent",
];

// =============================================================================
// Shared wire vocabulary
// =============================================================================

/// Content block type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Text,
    Audio,
    Tool,
}

/// Speaker role on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Parse a wire role, tolerating case variations. Unknown roles map to
    /// `Assistant` since the service only labels its own speech loosely.
    pub fn from_wire(raw: &str) -> Role {
        match raw.to_ascii_uppercase().as_str() {
            "SYSTEM" => Role::System,
            "USER" => Role::User,
            "TOOL" => Role::Tool,
            _ => Role::Assistant,
        }
    }
}

/// Generate a fresh content-block name, e.g. `audio_3f2a9c1d`.
pub fn content_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..8])
}

// =============================================================================
// Outgoing control events
// =============================================================================

/// Inference parameters sent with `sessionStart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

/// `mediaType`-only configuration blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfig {
    pub media_type: String,
}

impl MediaConfig {
    pub fn text_plain() -> Self {
        Self {
            media_type: "text/plain".to_string(),
        }
    }

    pub fn json() -> Self {
        Self {
            media_type: "application/json".to_string(),
        }
    }
}

/// Audio output parameters declared at `promptStart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfig {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub voice_id: String,
    pub encoding: String,
    pub audio_type: String,
}

/// Audio input parameters declared on an AUDIO `contentStart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfig {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub audio_type: String,
    pub encoding: String,
}

impl AudioInputConfig {
    pub fn lpcm(sample_rate_hertz: u32) -> Self {
        Self {
            media_type: "audio/lpcm".to_string(),
            sample_rate_hertz,
            sample_size_bits: 16,
            channel_count: 1,
            audio_type: "SPEECH".to_string(),
            encoding: "base64".to_string(),
        }
    }
}

/// Tool-result correlation declared on a TOOL `contentStart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultInputConfig {
    pub tool_use_id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub text_input_configuration: MediaConfig,
}

/// One tool made available to the model for this session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
}

/// The schema is carried as a JSON string, not inline JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    pub json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub tool_spec: ToolSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfiguration {
    pub tools: Vec<ToolEntry>,
}

/// `promptStart` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStart {
    pub prompt_name: String,
    pub text_output_configuration: MediaConfig,
    pub audio_output_configuration: AudioOutputConfig,
    pub tool_use_output_configuration: MediaConfig,
    pub tool_configuration: ToolConfiguration,
}

/// `contentStart` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub interactive: bool,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<MediaConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioInputConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result_input_configuration: Option<ToolResultInputConfig>,
}

impl ContentStart {
    /// A TEXT content block (system prompt injection).
    pub fn text(prompt_name: &str, content_name: &str, role: Role) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Text,
            interactive: true,
            role,
            text_input_configuration: Some(MediaConfig::text_plain()),
            audio_input_configuration: None,
            tool_result_input_configuration: None,
        }
    }

    /// The inbound user AUDIO content block.
    pub fn audio(prompt_name: &str, content_name: &str, sample_rate_hertz: u32) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Audio,
            interactive: true,
            role: Role::User,
            text_input_configuration: None,
            audio_input_configuration: Some(AudioInputConfig::lpcm(sample_rate_hertz)),
            tool_result_input_configuration: None,
        }
    }

    /// A TOOL content block carrying a tool result correlated by
    /// `tool_use_id`.
    pub fn tool_result(prompt_name: &str, content_name: &str, tool_use_id: &str) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: ContentType::Tool,
            interactive: false,
            role: Role::Tool,
            text_input_configuration: None,
            audio_input_configuration: None,
            tool_result_input_configuration: Some(ToolResultInputConfig {
                tool_use_id: tool_use_id.to_string(),
                content_type: ContentType::Text,
                text_input_configuration: MediaConfig::text_plain(),
            }),
        }
    }
}

/// A control event sent to the speech service. Serializes to the inner
/// `{"<kind>": {...}}` object of the wire envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlEvent {
    #[serde(rename_all = "camelCase")]
    SessionStart {
        inference_configuration: InferenceConfig,
    },
    PromptStart(PromptStart),
    ContentStart(ContentStart),
    #[serde(rename_all = "camelCase")]
    TextInput {
        prompt_name: String,
        content_name: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    AudioInput {
        prompt_name: String,
        content_name: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        prompt_name: String,
        content_name: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    ContentEnd {
        prompt_name: String,
        content_name: String,
    },
    #[serde(rename_all = "camelCase")]
    PromptEnd { prompt_name: String },
    SessionEnd {},
}

impl ControlEvent {
    /// Encode as a complete wire frame: `{"event": {...}}`.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&serde_json::json!({ "event": self }))
    }

    /// The wire kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlEvent::SessionStart { .. } => "sessionStart",
            ControlEvent::PromptStart(_) => "promptStart",
            ControlEvent::ContentStart(_) => "contentStart",
            ControlEvent::TextInput { .. } => "textInput",
            ControlEvent::AudioInput { .. } => "audioInput",
            ControlEvent::ToolResult { .. } => "toolResult",
            ControlEvent::ContentEnd { .. } => "contentEnd",
            ControlEvent::PromptEnd { .. } => "promptEnd",
            ControlEvent::SessionEnd {} => "sessionEnd",
        }
    }
}

// =============================================================================
// Incoming events
// =============================================================================

/// A decoded event from the speech service, ready for session dispatch.
#[derive(Debug, Clone)]
pub enum IncomingEvent {
    /// Transcript text for either speaker.
    TextOutput { role: Role, text: String },
    /// A chunk of synthesized speech.
    AudioOutput { frame: AudioFrame },
    /// The model requests a tool invocation.
    ToolUse {
        tool_use_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    /// The service closed one of its content blocks.
    ContentEnd {
        content_id: String,
        content_type: Option<ContentType>,
        stop_reason: Option<String>,
    },
    /// A frame whose kind this build does not know. Surfaced so protocol
    /// drift shows up as warnings instead of being dropped on the floor.
    Unparsed { kind: String },
    /// The upstream connection is gone; no further events will follow.
    Disconnected { message: String },
}

/// Errors raised while decoding an incoming frame. A decode error drops the
/// frame; it does not fail the session.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no event object")]
    MissingEvent,

    #[error("event object is empty")]
    EmptyEvent,

    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base64 audio: {0}")]
    Audio(#[from] base64::DecodeError),
}

#[derive(Debug, Deserialize)]
struct TextOutputWire {
    #[serde(default)]
    content: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AudioOutputWire {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolUseWire {
    tool_use_id: String,
    tool_name: String,
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentEndWire {
    content_name: String,
    #[serde(rename = "type")]
    content_type: Option<ContentType>,
    stop_reason: Option<String>,
}

/// Decode one wire frame. Returns `Ok(None)` for bookkeeping kinds the
/// session does not act on.
pub fn decode_event(
    raw: &str,
    output_sample_rate_hz: u32,
) -> Result<Option<IncomingEvent>, DecodeError> {
    let frame: serde_json::Value = serde_json::from_str(raw)?;
    let event = frame.get("event").ok_or(DecodeError::MissingEvent)?;
    let object = event.as_object().ok_or(DecodeError::MissingEvent)?;
    let (kind, payload) = object.iter().next().ok_or(DecodeError::EmptyEvent)?;

    let payload_err = |source| DecodeError::Payload {
        kind: kind.clone(),
        source,
    };

    match kind.as_str() {
        "textOutput" => {
            let wire: TextOutputWire =
                serde_json::from_value(payload.clone()).map_err(payload_err)?;
            let role = wire.role.as_deref().map(Role::from_wire).unwrap_or(Role::Assistant);
            Ok(Some(IncomingEvent::TextOutput {
                role,
                text: wire.content,
            }))
        }
        "audioOutput" => {
            let wire: AudioOutputWire =
                serde_json::from_value(payload.clone()).map_err(payload_err)?;
            let pcm = BASE64_STANDARD.decode(wire.content.as_bytes())?;
            Ok(Some(IncomingEvent::AudioOutput {
                frame: AudioFrame {
                    pcm: Bytes::from(pcm),
                    sample_rate_hz: output_sample_rate_hz,
                    direction: AudioDirection::Outbound,
                },
            }))
        }
        "toolUse" => {
            let wire: ToolUseWire =
                serde_json::from_value(payload.clone()).map_err(payload_err)?;
            // The input payload arrives as a JSON string; fall back to the
            // raw value when it is already structured.
            let input = match wire.content {
                serde_json::Value::String(text) => serde_json::from_str(&text)
                    .unwrap_or(serde_json::Value::String(text)),
                other => other,
            };
            Ok(Some(IncomingEvent::ToolUse {
                tool_use_id: wire.tool_use_id,
                tool_name: wire.tool_name,
                input,
            }))
        }
        "contentEnd" => {
            let wire: ContentEndWire =
                serde_json::from_value(payload.clone()).map_err(payload_err)?;
            Ok(Some(IncomingEvent::ContentEnd {
                content_id: wire.content_name,
                content_type: wire.content_type,
                stop_reason: wire.stop_reason,
            }))
        }
        _ if BOOKKEEPING_KINDS.contains(&kind.as_str()) => Ok(None),
        _ => Ok(Some(IncomingEvent::Unparsed { kind: kind.clone() })),
    }
}

/// Whether a `textOutput` payload carries the service's interruption marker.
///
/// The service reports barge-in as a JSON fragment embedded in a generic
/// text event rather than a first-class event type. Detection lives in this
/// one predicate so a dedicated interrupt event can replace it without
/// touching the session state machine.
pub fn is_interruption_marker(text: &str) -> bool {
    text.contains("\"interrupted\"") && text.to_ascii_lowercase().contains("true")
}
