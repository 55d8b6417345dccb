//! Server configuration.
//!
//! Loaded once at startup from a YAML file or from environment variables,
//! then injected read-only into every session. Nothing here is mutated at
//! runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::core::speech::SpeechConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid {field} URL '{value}': {message}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// TLS certificate configuration for the client-facing listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Agent backend used by the tool bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolBackendConfig {
    /// HTTP endpoint receiving invocation requests.
    pub endpoint: String,
    /// Upper bound on one invocation; a timeout is an invocation failure.
    pub timeout_seconds: u64,
}

impl Default for ToolBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000/invocations".to_string(),
            timeout_seconds: 30,
        }
    }
}

/// Where session transcripts are flushed at close.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptStoreConfig {
    /// S3 bucket; takes precedence when set.
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Local directory fallback for development.
    pub local_dir: Option<PathBuf>,
    /// Key prefix for session records.
    pub prefix: String,
}

impl Default for TranscriptStoreConfig {
    fn default() -> Self {
        Self {
            s3_bucket: None,
            s3_region: None,
            local_dir: None,
            prefix: "voice-sessions".to_string(),
        }
    }
}

/// Per-session tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    /// Capacity of the per-session audio queues.
    pub audio_queue_capacity: usize,
    /// Capacity of the session-to-transport notice channel.
    pub notice_queue_capacity: usize,
    /// Connections idle past this are closed.
    pub idle_timeout_seconds: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            audio_queue_capacity: 1024,
            notice_queue_capacity: 256,
            idle_timeout_seconds: 300,
        }
    }
}

/// A configured agent record for the static authorizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub name: String,
    #[serde(default)]
    pub voice_prompt: Option<String>,
    #[serde(default)]
    pub voice_personality: Option<String>,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    /// Comma-separated origins, or `*`. Unset means same-origin only.
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,

    pub auth_required: bool,
    pub auth_api_keys: Vec<String>,
    /// Agent records keyed by agent id. Empty means any agent id is
    /// accepted with a bare profile.
    pub agents: HashMap<String, AgentEntry>,

    pub speech: SpeechConfig,
    pub tools: ToolBackendConfig,
    pub transcripts: TranscriptStoreConfig,
    pub session: SessionTuning,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 100,
            rate_limit_burst_size: 50,
            auth_required: false,
            auth_api_keys: Vec::new(),
            agents: HashMap::new(),
            speech: SpeechConfig::default(),
            tools: ToolBackendConfig::default(),
            transcripts: TranscriptStoreConfig::default(),
            session: SessionTuning::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ServerConfig::default();

        if let Some(host) = env_var("ORATIO_HOST") {
            config.host = host;
        }
        if let Some(port) = env_var("ORATIO_PORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid ORATIO_PORT '{port}'")))?;
        }
        if let (Some(cert_path), Some(key_path)) =
            (env_var("TLS_CERT_PATH"), env_var("TLS_KEY_PATH"))
        {
            config.tls = Some(TlsConfig {
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            });
        }

        config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
        if let Some(rps) = parse_env("RATE_LIMIT_RPS")? {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = parse_env("RATE_LIMIT_BURST")? {
            config.rate_limit_burst_size = burst;
        }

        config.auth_required = env_var("AUTH_REQUIRED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if let Some(keys) = env_var("AUTH_API_KEYS") {
            config.auth_api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(endpoint) = env_var("SPEECH_ENDPOINT") {
            config.speech.endpoint = endpoint;
        }
        config.speech.api_key = env_var("SPEECH_API_KEY").or(config.speech.api_key);
        if let Some(model_id) = env_var("SPEECH_MODEL_ID") {
            config.speech.model_id = model_id;
        }
        if let Some(voice_id) = env_var("SPEECH_VOICE_ID") {
            config.speech.voice_id = voice_id;
        }

        if let Some(endpoint) = env_var("TOOL_BACKEND_URL") {
            config.tools.endpoint = endpoint;
        }
        if let Some(timeout) = parse_env("TOOL_TIMEOUT_SECONDS")? {
            config.tools.timeout_seconds = timeout;
        }

        config.transcripts.s3_bucket = env_var("TRANSCRIPTS_S3_BUCKET");
        config.transcripts.s3_region = env_var("TRANSCRIPTS_S3_REGION");
        config.transcripts.local_dir = env_var("TRANSCRIPTS_LOCAL_DIR").map(PathBuf::from);
        if let Some(prefix) = env_var("TRANSCRIPTS_PREFIX") {
            config.transcripts.prefix = prefix;
        }

        if let Some(idle) = parse_env("IDLE_TIMEOUT_SECONDS")? {
            config.session.idle_timeout_seconds = idle;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints and URL syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let speech = parse_url("speech.endpoint", &self.speech.endpoint)?;
        if !matches!(speech.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "speech.endpoint must be a ws:// or wss:// URL, got '{}'",
                self.speech.endpoint
            )));
        }
        let tools = parse_url("tools.endpoint", &self.tools.endpoint)?;
        if !matches!(tools.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "tools.endpoint must be an http:// or https:// URL, got '{}'",
                self.tools.endpoint
            )));
        }
        if self.auth_required && self.auth_api_keys.is_empty() {
            return Err(ConfigError::Invalid(
                "auth_required is set but auth_api_keys is empty".to_string(),
            ));
        }
        if self.session.audio_queue_capacity == 0 || self.session.notice_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session queue capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// The validated tool backend endpoint.
    pub fn tool_endpoint(&self) -> Url {
        // validate() ran at load time; this cannot fail afterwards.
        Url::parse(&self.tools.endpoint).expect("tool endpoint validated at load")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("invalid {name} '{raw}'"))),
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        message: e.to_string(),
    })
}
