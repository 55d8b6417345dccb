//! Speech-service connection configuration.

use serde::{Deserialize, Serialize};

use super::events::InferenceConfig;

/// Default model the service runs when none is configured.
pub const DEFAULT_MODEL_ID: &str = "amazon.nova-sonic-v1:0";

/// Default synthesized voice.
pub const DEFAULT_VOICE_ID: &str = "tiffany";

/// Client microphone sample rate.
pub const DEFAULT_INPUT_SAMPLE_RATE_HZ: u32 = 16_000;

/// Synthesized speech sample rate.
pub const DEFAULT_OUTPUT_SAMPLE_RATE_HZ: u32 = 24_000;

/// Configuration for one upstream stream connection. Injected at session
/// creation; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// WebSocket endpoint of the speech service.
    pub endpoint: String,

    /// Bearer token for the service, if it requires one.
    pub api_key: Option<String>,

    /// Model identifier passed in the connection URL.
    pub model_id: String,

    /// Voice for synthesized output.
    pub voice_id: String,

    /// Sample rate of inbound (client) audio.
    pub input_sample_rate_hz: u32,

    /// Sample rate of outbound (synthesized) audio.
    pub output_sample_rate_hz: u32,

    /// Generation parameters sent at session start.
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,

    /// Capacity of the incoming-event and outgoing-frame channels.
    pub channel_capacity: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://localhost:8443/stream".to_string(),
            api_key: None,
            model_id: DEFAULT_MODEL_ID.to_string(),
            voice_id: DEFAULT_VOICE_ID.to_string(),
            input_sample_rate_hz: DEFAULT_INPUT_SAMPLE_RATE_HZ,
            output_sample_rate_hz: DEFAULT_OUTPUT_SAMPLE_RATE_HZ,
            max_tokens: 1024,
            // Higher top_p keeps the model on likely tokens; the slightly
            // raised temperature gives more natural speech patterns.
            top_p: 0.95,
            temperature: 0.8,
            channel_capacity: 256,
        }
    }
}

impl SpeechConfig {
    pub fn inference(&self) -> InferenceConfig {
        InferenceConfig {
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            temperature: self.temperature,
        }
    }
}
