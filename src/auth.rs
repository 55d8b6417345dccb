//! Session identity inputs.
//!
//! Account and agent-configuration management live in a separate service;
//! this gateway only needs to turn `(agent_id, api_key)` into an agent
//! profile it may start a session for. The trait is the seam to that
//! collaborator; the static implementation serves deployments that pin
//! keys and agent profiles in configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// The agent configuration a session is started with.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub agent_name: String,
    pub voice_prompt: Option<String>,
    pub voice_personality: Option<String>,
}

impl AgentProfile {
    /// Profile for an agent id with no configured record.
    pub fn unnamed(agent_id: &str) -> Self {
        Self {
            agent_name: agent_id.to_string(),
            voice_prompt: None,
            voice_personality: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("API key required")]
    MissingKey,

    #[error("invalid API key")]
    InvalidKey,

    #[error("unknown agent: {0}")]
    UnknownAgent(String),
}

/// Resolves connection credentials to an agent profile.
#[async_trait]
pub trait SessionAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        agent_id: &str,
        api_key: Option<&str>,
    ) -> Result<AgentProfile, AuthError>;
}

/// Authorizer backed by static configuration: a set of accepted API keys
/// and the agent profiles they unlock.
pub struct StaticAuthorizer {
    require_key: bool,
    api_keys: Vec<String>,
    agents: HashMap<String, AgentProfile>,
}

impl StaticAuthorizer {
    pub fn new(
        require_key: bool,
        api_keys: Vec<String>,
        agents: HashMap<String, AgentProfile>,
    ) -> Self {
        Self {
            require_key,
            api_keys,
            agents,
        }
    }
}

#[async_trait]
impl SessionAuthorizer for StaticAuthorizer {
    async fn authorize(
        &self,
        agent_id: &str,
        api_key: Option<&str>,
    ) -> Result<AgentProfile, AuthError> {
        if self.require_key {
            let key = api_key.ok_or(AuthError::MissingKey)?;
            if !self.api_keys.iter().any(|candidate| candidate == key) {
                return Err(AuthError::InvalidKey);
            }
        }

        match self.agents.get(agent_id) {
            Some(profile) => Ok(profile.clone()),
            // With no agent records configured, any agent id is accepted
            // with a bare profile. With records, unknown ids are rejected.
            None if self.agents.is_empty() => Ok(AgentProfile::unnamed(agent_id)),
            None => Err(AuthError::UnknownAgent(agent_id.to_string())),
        }
    }
}
