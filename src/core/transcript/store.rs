//! Transcript persistence.
//!
//! One JSON record per session, written at close. Backed by `object_store`
//! so the same code serves S3 in production and a local directory or plain
//! memory in development.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};
use serde::Serialize;

use super::{TranscriptError, TranscriptLog};

/// The external persistence collaborator for finished sessions.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn flush(&self, log: &TranscriptLog) -> Result<(), TranscriptError>;
}

#[derive(Serialize)]
struct SessionRecord<'a> {
    #[serde(flatten)]
    log: &'a TranscriptLog,
    summary: super::SessionSummary,
}

/// Object-store backed transcript persistence.
pub struct ObjectStoreTranscripts {
    store: Arc<dyn ObjectStore>,
    prefix: StorePath,
}

impl ObjectStoreTranscripts {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: StorePath::from(prefix.into()),
        }
    }

    fn record_path(&self, log: &TranscriptLog) -> StorePath {
        self.prefix
            .child(log.agent_id.as_str())
            .child(format!("{}.json", log.session_id))
    }
}

#[async_trait]
impl TranscriptStore for ObjectStoreTranscripts {
    async fn flush(&self, log: &TranscriptLog) -> Result<(), TranscriptError> {
        let record = SessionRecord {
            log,
            summary: log.summary(),
        };
        let body = serde_json::to_vec(&record)?;
        let path = self.record_path(log);

        self.store
            .put(&path, PutPayload::from(body))
            .await?;

        tracing::info!(
            session_id = %log.session_id,
            turns = log.turns.len(),
            path = %path,
            "transcript flushed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transcript::TurnRole;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_flush_writes_one_record() {
        let memory = Arc::new(InMemory::new());
        let store = ObjectStoreTranscripts::new(memory.clone(), "voice-sessions");

        let mut log = TranscriptLog::new("sess-1", "agent-1", "actor-1");
        log.append(TurnRole::User, "hello");
        log.finish();

        store.flush(&log).await.unwrap();

        let path = StorePath::from("voice-sessions/agent-1/sess-1.json");
        let data = memory.get(&path).await.unwrap().bytes().await.unwrap();
        let record: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(record["session_id"], "sess-1");
        assert_eq!(record["summary"]["user_turns"], 1);
    }
}
