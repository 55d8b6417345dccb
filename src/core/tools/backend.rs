//! Agent backend interface and its HTTP implementation.

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use super::ToolError;

/// The external business-logic agent, treated as a black box: one query in,
/// one answer text out.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn invoke(
        &self,
        agent_id: &str,
        actor_id: &str,
        session_id: &str,
        query: &str,
    ) -> Result<String, ToolError>;
}

#[derive(Serialize)]
struct InvocationRequest<'a> {
    agent_id: &'a str,
    actor_id: &'a str,
    session_id: &'a str,
    prompt: &'a str,
}

/// HTTP agent backend: one JSON POST per invocation.
///
/// Response contract: `{"error": "..."}` reports a backend failure;
/// otherwise `{"output": ...}` carries the answer, either as
/// `output.message.content[0].text` or as a plain string.
pub struct HttpAgentBackend {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpAgentBackend {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    fn extract_answer(output: &serde_json::Value) -> String {
        output
            .pointer("/message/content/0/text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| match output {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn invoke(
        &self,
        agent_id: &str,
        actor_id: &str,
        session_id: &str,
        query: &str,
    ) -> Result<String, ToolError> {
        tracing::debug!(agent_id, session_id, "invoking agent backend");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&InvocationRequest {
                agent_id,
                actor_id,
                session_id,
                prompt: query,
            })
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            return Err(ToolError::Backend(error.to_string()));
        }
        if !status.is_success() {
            return Err(ToolError::Backend(format!(
                "backend returned status {status}"
            )));
        }

        let output = body
            .get("output")
            .ok_or_else(|| ToolError::InvalidResponse("response has no output field".into()))?;
        let answer = Self::extract_answer(output);
        tracing::debug!(agent_id, answer_len = answer.len(), "agent backend answered");
        Ok(answer)
    }
}
