//! Shared application state.

use std::collections::HashMap;
use std::sync::Arc;

use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;

use crate::auth::{AgentProfile, SessionAuthorizer, StaticAuthorizer};
use crate::config::ServerConfig;
use crate::core::tools::{AgentBackend, HttpAgentBackend};
use crate::core::transcript::{ObjectStoreTranscripts, TranscriptStore};
use crate::errors::AppError;
use crate::registry::SessionRegistry;

/// Built once at startup and shared by reference with every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub authorizer: Arc<dyn SessionAuthorizer>,
    pub tool_backend: Arc<dyn AgentBackend>,
    pub transcripts: Arc<dyn TranscriptStore>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self, AppError> {
        let agents: HashMap<String, AgentProfile> = config
            .agents
            .iter()
            .map(|(agent_id, entry)| {
                (
                    agent_id.clone(),
                    AgentProfile {
                        agent_name: entry.name.clone(),
                        voice_prompt: entry.voice_prompt.clone(),
                        voice_personality: entry.voice_personality.clone(),
                    },
                )
            })
            .collect();
        let authorizer = Arc::new(StaticAuthorizer::new(
            config.auth_required,
            config.auth_api_keys.clone(),
            agents,
        ));

        let tool_backend = Arc::new(HttpAgentBackend::new(config.tool_endpoint()));
        let transcripts = build_transcript_store(&config)?;

        Ok(Self {
            config,
            registry: SessionRegistry::new(),
            authorizer,
            tool_backend,
            transcripts,
        })
    }
}

fn build_transcript_store(config: &ServerConfig) -> Result<Arc<dyn TranscriptStore>, AppError> {
    let settings = &config.transcripts;
    let store: Arc<dyn ObjectStore> = if let Some(ref bucket) = settings.s3_bucket {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket.clone());
        if let Some(ref region) = settings.s3_region {
            builder = builder.with_region(region.clone());
        }
        Arc::new(
            builder
                .build()
                .map_err(|e| AppError::Startup(format!("transcript S3 store: {e}")))?,
        )
    } else if let Some(ref dir) = settings.local_dir {
        Arc::new(
            LocalFileSystem::new_with_prefix(dir)
                .map_err(|e| AppError::Startup(format!("transcript directory: {e}")))?,
        )
    } else {
        tracing::warn!("no transcript destination configured, transcripts stay in memory");
        Arc::new(InMemory::new())
    };

    Ok(Arc::new(ObjectStoreTranscripts::new(
        store,
        settings.prefix.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_default_config() {
        let state = AppState::new(ServerConfig::default()).unwrap();
        assert!(state.registry.is_empty());
    }
}
