//! In-memory doubles for driving full sessions without a network.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use oratio_gateway::core::session::{
    SessionArgs, SessionContext, SessionHandle, SessionNotice,
};
use oratio_gateway::core::speech::{
    SpeechConfig, SpeechError, SpeechStreamClient, StreamSink, StreamSource, StreamTransport,
};
use oratio_gateway::core::tools::{AgentBackend, ToolBridge, ToolError, default_tool_schema};
use oratio_gateway::core::transcript::{TranscriptError, TranscriptLog, TranscriptStore};

pub const TEST_SESSION_ID: &str = "sess-1";
pub const TEST_AGENT_ID: &str = "agent-1";
pub const TEST_ACTOR_ID: &str = "actor-1";

// =============================================================================
// Mock stream transport
// =============================================================================

/// Transport double: records every frame the client writes and lets the
/// test inject frames as if the service sent them.
pub struct MockTransport {
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
    incoming: Option<mpsc::Receiver<Result<String, SpeechError>>>,
    sink_closed: Arc<AtomicBool>,
}

/// Test-side controller for a [`MockTransport`].
pub struct MockUpstream {
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
    tx: Option<mpsc::Sender<Result<String, SpeechError>>>,
    sink_closed: Arc<AtomicBool>,
}

pub fn mock_transport() -> (MockTransport, MockUpstream) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink_closed = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel(256);
    (
        MockTransport {
            sent: sent.clone(),
            incoming: Some(rx),
            sink_closed: sink_closed.clone(),
        },
        MockUpstream {
            sent,
            tx: Some(tx),
            sink_closed,
        },
    )
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn connect(
        &mut self,
    ) -> Result<(Box<dyn StreamSink>, Box<dyn StreamSource>), SpeechError> {
        let rx = self
            .incoming
            .take()
            .ok_or_else(|| SpeechError::ConnectionFailed("mock already connected".into()))?;
        Ok((
            Box::new(MockSink {
                sent: self.sent.clone(),
                closed: self.sink_closed.clone(),
            }),
            Box::new(MockSource { rx }),
        ))
    }
}

struct MockSink {
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl StreamSink for MockSink {
    async fn send(&mut self, frame: String) -> Result<(), SpeechError> {
        let value: serde_json::Value = serde_json::from_str(&frame)
            .map_err(|e| SpeechError::WebSocket(format!("mock received invalid JSON: {e}")))?;
        self.sent.lock().push(value);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SpeechError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockSource {
    rx: mpsc::Receiver<Result<String, SpeechError>>,
}

#[async_trait]
impl StreamSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<String, SpeechError>> {
        self.rx.recv().await
    }
}

impl MockUpstream {
    /// Inject one event, e.g. `emit(json!({"textOutput": {...}}))`.
    pub async fn emit(&self, event: serde_json::Value) {
        let frame = serde_json::json!({ "event": event }).to_string();
        self.tx
            .as_ref()
            .expect("upstream disconnected")
            .send(Ok(frame))
            .await
            .expect("mock source gone");
    }

    /// Inject a raw (possibly malformed) frame.
    pub async fn emit_raw(&self, frame: &str) {
        self.tx
            .as_ref()
            .expect("upstream disconnected")
            .send(Ok(frame.to_string()))
            .await
            .expect("mock source gone");
    }

    /// Inject a connection-level error.
    pub async fn emit_error(&self, message: &str) {
        self.tx
            .as_ref()
            .expect("upstream disconnected")
            .send(Err(SpeechError::WebSocket(message.to_string())))
            .await
            .expect("mock source gone");
    }

    /// Simulate the service closing the connection.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    pub fn sink_closed(&self) -> bool {
        self.sink_closed.load(Ordering::SeqCst)
    }

    /// Everything the client has written, as parsed envelopes.
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent.lock().clone()
    }

    /// The event kind of each written frame, in order.
    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|frame| {
                frame["event"]
                    .as_object()
                    .and_then(|o| o.keys().next().cloned())
            })
            .collect()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.sent_kinds().iter().filter(|k| k == &kind).count()
    }

    /// Poll until at least `count` frames of `kind` have been written.
    pub async fn wait_for_kind(&self, kind: &str, count: usize) {
        wait_until(|| self.count_kind(kind) >= count, &format!("{count}x {kind}")).await;
    }

    /// Payloads of every frame of the given kind, in order.
    pub fn payloads_of(&self, kind: &str) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|frame| frame["event"].get(kind).cloned())
            .collect()
    }
}

/// Poll a condition with a hard deadline.
pub async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Recording transcript store
// =============================================================================

#[derive(Default)]
pub struct RecordingStore {
    pub flushed: Mutex<Vec<TranscriptLog>>,
}

#[async_trait]
impl TranscriptStore for RecordingStore {
    async fn flush(&self, log: &TranscriptLog) -> Result<(), TranscriptError> {
        self.flushed.lock().push(log.clone());
        Ok(())
    }
}

// =============================================================================
// Agent backend doubles
// =============================================================================

/// Answers every query with the same text, after an optional delay.
pub struct StaticBackend {
    pub answer: String,
    pub delay: Duration,
}

#[async_trait]
impl AgentBackend for StaticBackend {
    async fn invoke(
        &self,
        _agent_id: &str,
        _actor_id: &str,
        _session_id: &str,
        _query: &str,
    ) -> Result<String, ToolError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.answer.clone())
    }
}

/// Maps queries to (answer, delay) pairs; unknown queries fail.
pub struct DelayMapBackend {
    pub answers: HashMap<String, (String, Duration)>,
}

#[async_trait]
impl AgentBackend for DelayMapBackend {
    async fn invoke(
        &self,
        _agent_id: &str,
        _actor_id: &str,
        _session_id: &str,
        query: &str,
    ) -> Result<String, ToolError> {
        match self.answers.get(query) {
            Some((answer, delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(answer.clone())
            }
            None => Err(ToolError::Backend(format!("no answer for '{query}'"))),
        }
    }
}

// =============================================================================
// Session harness
// =============================================================================

pub struct TestSession {
    pub handle: SessionHandle,
    pub upstream: MockUpstream,
    pub notices: mpsc::Receiver<SessionNotice>,
    pub store: Arc<RecordingStore>,
}

/// Start a full session over a mock transport.
pub async fn start_test_session(
    backend: Arc<dyn AgentBackend>,
    notice_capacity: usize,
) -> TestSession {
    let (transport, upstream) = mock_transport();
    let client = SpeechStreamClient::new(SpeechConfig::default(), Box::new(transport));
    let bridge = ToolBridge::new(
        backend,
        TEST_AGENT_ID,
        TEST_ACTOR_ID,
        TEST_SESSION_ID,
        Duration::from_secs(5),
    );
    let store = Arc::new(RecordingStore::default());
    let (notice_tx, notices) = mpsc::channel(notice_capacity);

    let handle = SessionHandle::start(SessionArgs {
        ctx: SessionContext {
            session_id: TEST_SESSION_ID.to_string(),
            agent_id: TEST_AGENT_ID.to_string(),
            actor_id: TEST_ACTOR_ID.to_string(),
            input_sample_rate_hz: 16_000,
            audio_queue_capacity: 64,
        },
        client,
        system_prompt: "You are a test assistant.".to_string(),
        tools: default_tool_schema(),
        bridge,
        store: store.clone(),
        notices: notice_tx,
    })
    .await
    .expect("session failed to start");

    TestSession {
        handle,
        upstream,
        notices,
        store,
    }
}

/// Receive the next notice with a deadline.
pub async fn next_notice(notices: &mut mpsc::Receiver<SessionNotice>) -> SessionNotice {
    tokio::time::timeout(Duration::from_secs(2), notices.recv())
        .await
        .expect("timed out waiting for session notice")
        .expect("notice channel closed")
}
