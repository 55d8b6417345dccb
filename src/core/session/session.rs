//! Per-session task set and lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::core::speech::events::{ContentStart, ControlEvent, content_name};
use crate::core::speech::{
    AudioDirection, AudioFrame, IncomingEvent, Role, SpeechError, SpeechSender,
    SpeechStreamClient, ToolSpec, is_interruption_marker,
};
use crate::core::tools::ToolBridge;
use crate::core::transcript::{TranscriptLog, TranscriptStore, TurnRole};

use super::{CloseReason, SessionContext, SessionError, SessionNotice, SessionState};

/// Everything needed to bring one session up.
pub struct SessionArgs {
    pub ctx: SessionContext,
    pub client: SpeechStreamClient,
    pub system_prompt: String,
    pub tools: Vec<ToolSpec>,
    pub bridge: ToolBridge,
    pub store: Arc<dyn TranscriptStore>,
    /// Where session notices are delivered; the transport adapter owns the
    /// receiving end.
    pub notices: mpsc::Sender<SessionNotice>,
}

/// State shared by the session's tasks. Lifecycle transitions only happen
/// on the single close path; everything else is flags and bookkeeping.
struct SessionShared {
    ctx: SessionContext,
    state: Mutex<SessionState>,
    /// Set by the event dispatch loop, cleared by the outbound relay after
    /// it drains the queued audio.
    barge_in: AtomicBool,
    barge_signal: Notify,
    /// Name of the currently open inbound AUDIO content block, if any.
    audio_content: Mutex<Option<String>>,
    /// In-flight tool invocations, keyed by toolUseId.
    pending_tools: Mutex<HashMap<String, String>>,
    transcript: Mutex<TranscriptLog>,
    close_reason: Mutex<Option<CloseReason>>,
    cancel: CancellationToken,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Request session close. The first caller's reason wins; the actual
    /// teardown runs once, in the closer task.
    fn request_close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }
}

/// Owning handle for a running session, held by the transport adapter.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    sender: SpeechSender,
    audio_tx: mpsc::Sender<Bytes>,
    closer: Option<JoinHandle<()>>,
}

/// Cloneable reference for the session registry: enough to route frames
/// and request close, nothing more.
#[derive(Clone)]
pub struct SessionRef {
    shared: Arc<SessionShared>,
    audio_tx: mpsc::Sender<Bytes>,
}

impl SessionHandle {
    /// Open the upstream stream, run the handshake, open the inbound audio
    /// content and spawn the session tasks. On success the session is in
    /// `AudioActive` and a `Ready` notice has been emitted.
    pub async fn start(args: SessionArgs) -> Result<SessionHandle, SessionError> {
        let SessionArgs {
            ctx,
            mut client,
            system_prompt,
            tools,
            bridge,
            store,
            notices,
        } = args;

        info!(
            session_id = %ctx.session_id,
            agent_id = %ctx.agent_id,
            "starting voice session"
        );

        client
            .open(&system_prompt, &tools)
            .await
            .map_err(SessionError::Handshake)?;
        let sender = client.sender().map_err(SessionError::Handshake)?;
        let Some(events) = client.take_events() else {
            client.close().await;
            return Err(SessionError::EventsUnavailable);
        };

        let shared = Arc::new(SessionShared {
            transcript: Mutex::new(TranscriptLog::new(
                ctx.session_id.as_str(),
                ctx.agent_id.as_str(),
                ctx.actor_id.as_str(),
            )),
            ctx,
            state: Mutex::new(SessionState::Initializing),
            barge_in: AtomicBool::new(false),
            barge_signal: Notify::new(),
            audio_content: Mutex::new(None),
            pending_tools: Mutex::new(HashMap::new()),
            close_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
        });

        // Open the inbound audio content before going active.
        let audio_name = content_name("audio");
        let open_audio = ControlEvent::ContentStart(ContentStart::audio(
            sender.prompt_name(),
            &audio_name,
            shared.ctx.input_sample_rate_hz,
        ));
        if let Err(e) = sender.send_control(open_audio).await {
            client.close().await;
            return Err(SessionError::Upstream(e));
        }
        *shared.audio_content.lock() = Some(audio_name);

        let _ = notices.send(SessionNotice::Ready).await;
        *shared.state.lock() = SessionState::AudioActive;

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(shared.ctx.audio_queue_capacity);
        let (out_audio_tx, out_audio_rx) =
            mpsc::channel::<AudioFrame>(shared.ctx.audio_queue_capacity);

        tokio::spawn(dispatch_loop(
            shared.clone(),
            events,
            out_audio_tx,
            notices.clone(),
            sender.clone(),
            bridge,
        ));
        tokio::spawn(inbound_relay(shared.clone(), audio_rx, sender.clone()));
        tokio::spawn(outbound_relay(shared.clone(), out_audio_rx, notices.clone()));
        let closer = tokio::spawn(closer_task(
            shared.clone(),
            client,
            sender.clone(),
            store,
            notices,
        ));

        Ok(SessionHandle {
            shared,
            sender,
            audio_tx,
            closer: Some(closer),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.shared.ctx.session_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn session_ref(&self) -> SessionRef {
        SessionRef {
            shared: self.shared.clone(),
            audio_tx: self.audio_tx.clone(),
        }
    }

    /// Queue one client audio frame for the inbound relay. Returns false
    /// once the session is closing.
    pub async fn push_audio(&self, pcm: Bytes) -> bool {
        self.audio_tx.send(pcm).await.is_ok()
    }

    /// Open a fresh inbound audio content block. No-op when one is open.
    pub async fn start_audio(&self) -> Result<(), SessionError> {
        if self.shared.state() != SessionState::AudioActive {
            return Err(SessionError::NotActive);
        }
        if self.shared.audio_content.lock().is_some() {
            return Ok(());
        }
        let name = content_name("audio");
        let event = ControlEvent::ContentStart(ContentStart::audio(
            self.sender.prompt_name(),
            &name,
            self.shared.ctx.input_sample_rate_hz,
        ));
        self.sender
            .send_control(event)
            .await
            .map_err(SessionError::Upstream)?;
        *self.shared.audio_content.lock() = Some(name);
        debug!(session_id = %self.session_id(), "inbound audio content opened");
        Ok(())
    }

    /// Close the open inbound audio content block, leaving the session
    /// active. No-op when none is open.
    pub async fn stop_audio(&self) -> Result<(), SessionError> {
        let Some(name) = self.shared.audio_content.lock().take() else {
            return Ok(());
        };
        let event = ControlEvent::ContentEnd {
            prompt_name: self.sender.prompt_name().to_string(),
            content_name: name,
        };
        debug!(session_id = %self.session_id(), "inbound audio content closed");
        self.sender
            .send_control(event)
            .await
            .map_err(SessionError::Upstream)
    }

    /// Close the session and wait for teardown to complete. Safe to call
    /// after another task has already requested close.
    pub async fn shutdown(&mut self, reason: CloseReason) {
        self.shared.request_close(reason);
        if let Some(closer) = self.closer.take() {
            let _ = closer.await;
        }
    }
}

impl SessionRef {
    pub fn session_id(&self) -> &str {
        &self.shared.ctx.session_id
    }

    pub fn agent_id(&self) -> &str {
        &self.shared.ctx.agent_id
    }

    pub fn actor_id(&self) -> &str {
        &self.shared.ctx.actor_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub async fn push_audio(&self, pcm: Bytes) -> bool {
        self.audio_tx.send(pcm).await.is_ok()
    }

    pub fn request_close(&self, reason: CloseReason) {
        self.shared.request_close(reason);
    }
}

// =============================================================================
// Session tasks
// =============================================================================

/// The single consumer of upstream events. Dispatches each event without
/// blocking on downstream I/O: work lands on queues or in spawned tasks.
async fn dispatch_loop(
    shared: Arc<SessionShared>,
    mut events: mpsc::Receiver<IncomingEvent>,
    out_audio: mpsc::Sender<AudioFrame>,
    notices: mpsc::Sender<SessionNotice>,
    sender: SpeechSender,
    bridge: ToolBridge,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            event = events.recv() => match event {
                None => {
                    shared.request_close(CloseReason::UpstreamError(
                        "event stream ended".to_string(),
                    ));
                    break;
                }
                Some(event) => dispatch_event(&shared, event, &out_audio, &notices, &sender, &bridge),
            }
        }
    }
    debug!(session_id = %shared.ctx.session_id, "event dispatch loop stopped");
}

fn dispatch_event(
    shared: &Arc<SessionShared>,
    event: IncomingEvent,
    out_audio: &mpsc::Sender<AudioFrame>,
    notices: &mpsc::Sender<SessionNotice>,
    sender: &SpeechSender,
    bridge: &ToolBridge,
) {
    match event {
        IncomingEvent::TextOutput { role, text } => {
            if is_interruption_marker(&text) {
                info!(session_id = %shared.ctx.session_id, "barge-in detected");
                shared.barge_in.store(true, Ordering::SeqCst);
                shared.barge_signal.notify_one();
                return;
            }
            let turn_role = match role {
                Role::User => TurnRole::User,
                _ => TurnRole::Assistant,
            };
            shared.transcript.lock().append(turn_role, text.clone());
            if notices
                .try_send(SessionNotice::Transcript {
                    role: turn_role,
                    content: text,
                })
                .is_err()
            {
                warn!("transport busy, dropping transcript notification");
            }
        }
        IncomingEvent::AudioOutput { frame } => {
            // A relay that has fallen behind loses frames; stalling the
            // dispatch loop here would stall barge-in handling too.
            if out_audio.try_send(frame).is_err() {
                warn!(
                    session_id = %shared.ctx.session_id,
                    "outbound audio queue full, dropping frame"
                );
            }
        }
        IncomingEvent::ToolUse {
            tool_use_id,
            tool_name,
            input,
        } => {
            {
                let mut pending = shared.pending_tools.lock();
                if pending.contains_key(&tool_use_id) {
                    warn!(%tool_use_id, "duplicate tool invocation, skipping");
                    return;
                }
                pending.insert(tool_use_id.clone(), tool_name.clone());
            }
            info!(
                session_id = %shared.ctx.session_id,
                tool = %tool_name,
                %tool_use_id,
                "tool use requested"
            );
            let _ = notices.try_send(SessionNotice::ToolCall {
                tool: tool_name.clone(),
                input: input.clone(),
            });
            tokio::spawn(run_tool_invocation(
                shared.clone(),
                sender.clone(),
                bridge.clone(),
                notices.clone(),
                tool_use_id,
                tool_name,
                input,
            ));
        }
        IncomingEvent::ContentEnd {
            content_id,
            content_type,
            stop_reason,
        } => {
            trace!(
                %content_id,
                ?content_type,
                ?stop_reason,
                "upstream content block closed"
            );
        }
        IncomingEvent::Unparsed { kind } => {
            warn!(%kind, "unrecognized event from speech service");
        }
        IncomingEvent::Disconnected { message } => {
            shared.request_close(CloseReason::UpstreamError(message));
        }
    }
}

/// One tool invocation: call the backend, then send the result upstream as
/// its own TOOL content block. A backend failure becomes a structured error
/// payload in the conversation, never a session fault.
async fn run_tool_invocation(
    shared: Arc<SessionShared>,
    sender: SpeechSender,
    bridge: ToolBridge,
    notices: mpsc::Sender<SessionNotice>,
    tool_use_id: String,
    tool_name: String,
    input: serde_json::Value,
) {
    let outcome = bridge.invoke(&tool_name, &input).await;
    let payload = match &outcome {
        Ok(answer) => serde_json::json!({ "answer": answer }),
        Err(e) => {
            warn!(tool = %tool_name, error = %e, "tool invocation failed");
            serde_json::json!({ "error": e.to_string() })
        }
    };

    let block_name = content_name("tool");
    let prompt_name = sender.prompt_name().to_string();
    let block = vec![
        ControlEvent::ContentStart(ContentStart::tool_result(
            &prompt_name,
            &block_name,
            &tool_use_id,
        )),
        ControlEvent::ToolResult {
            prompt_name: prompt_name.clone(),
            content_name: block_name.clone(),
            content: payload.to_string(),
        },
        ControlEvent::ContentEnd {
            prompt_name,
            content_name: block_name,
        },
    ];
    if let Err(e) = sender.send_block(block).await {
        debug!(%tool_use_id, error = %e, "discarding tool result for closed session");
        shared.pending_tools.lock().remove(&tool_use_id);
        return;
    }

    let result_text = match outcome {
        Ok(answer) => answer,
        Err(e) => format!("error: {e}"),
    };
    shared
        .transcript
        .lock()
        .append_tool_call(tool_name.as_str(), input, result_text.as_str());
    let _ = notices.try_send(SessionNotice::ToolResult {
        tool: tool_name,
        result: result_text,
    });
    shared.pending_tools.lock().remove(&tool_use_id);
}

/// Forwards client audio frames upstream. May block briefly on network
/// I/O; that never stalls the dispatch loop.
async fn inbound_relay(
    shared: Arc<SessionShared>,
    mut audio_rx: mpsc::Receiver<Bytes>,
    sender: SpeechSender,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            chunk = audio_rx.recv() => match chunk {
                None => break,
                Some(pcm) => {
                    let content = shared.audio_content.lock().clone();
                    let Some(content) = content else {
                        trace!("no open audio content, dropping inbound frame");
                        continue;
                    };
                    let frame = AudioFrame {
                        pcm,
                        sample_rate_hz: shared.ctx.input_sample_rate_hz,
                        direction: AudioDirection::Inbound,
                    };
                    if let Err(e) = sender.send_audio(&content, &frame).await {
                        warn!(error = %e, "failed to forward inbound audio");
                        let reason = match e {
                            SpeechError::NotOpen => {
                                CloseReason::ProtocolViolation(e.to_string())
                            }
                            other => CloseReason::UpstreamError(other.to_string()),
                        };
                        shared.request_close(reason);
                        break;
                    }
                }
            }
        }
    }
    debug!(session_id = %shared.ctx.session_id, "inbound relay stopped");
}

enum RelayWake {
    Cancelled,
    Interrupted,
    Frame(Option<AudioFrame>),
}

/// Forwards synthesized audio to the transport, and on barge-in discards
/// everything queued but not yet delivered.
async fn outbound_relay(
    shared: Arc<SessionShared>,
    mut out_rx: mpsc::Receiver<AudioFrame>,
    notices: mpsc::Sender<SessionNotice>,
) {
    loop {
        let wake = tokio::select! {
            _ = shared.cancel.cancelled() => RelayWake::Cancelled,
            _ = shared.barge_signal.notified() => RelayWake::Interrupted,
            frame = out_rx.recv() => RelayWake::Frame(frame),
        };
        match wake {
            RelayWake::Cancelled | RelayWake::Frame(None) => break,
            RelayWake::Interrupted => {
                if !drain_after_interrupt(&shared, &mut out_rx, &notices).await {
                    break;
                }
            }
            RelayWake::Frame(Some(frame)) => {
                if shared.barge_in.load(Ordering::SeqCst) {
                    // This frame belongs to the interrupted response.
                    drop(frame);
                    if !drain_after_interrupt(&shared, &mut out_rx, &notices).await {
                        break;
                    }
                } else if notices.send(SessionNotice::Audio(frame)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(session_id = %shared.ctx.session_id, "outbound relay stopped");
}

/// Barge-in: the client is told to stop playback first, then the queued
/// backlog is discarded and the flag cleared. The session stays in
/// `AudioActive`; neither the inbound audio content nor the upstream
/// connection is touched.
async fn drain_after_interrupt(
    shared: &SessionShared,
    out_rx: &mut mpsc::Receiver<AudioFrame>,
    notices: &mpsc::Sender<SessionNotice>,
) -> bool {
    // A stale wake-up after the flag was already cleared is a no-op.
    if !shared.barge_in.load(Ordering::SeqCst) {
        return true;
    }
    if notices.send(SessionNotice::BargeIn).await.is_err() {
        return false;
    }
    let mut discarded = 0usize;
    while out_rx.try_recv().is_ok() {
        discarded += 1;
    }
    shared.barge_in.store(false, Ordering::SeqCst);
    debug!(
        session_id = %shared.ctx.session_id,
        discarded,
        "discarded queued outbound audio after barge-in"
    );
    true
}

/// Runs the ordered teardown exactly once, whichever task requested it.
/// Every step is attempted even when an earlier one fails.
async fn closer_task(
    shared: Arc<SessionShared>,
    mut client: SpeechStreamClient,
    sender: SpeechSender,
    store: Arc<dyn TranscriptStore>,
    notices: mpsc::Sender<SessionNotice>,
) {
    shared.cancel.cancelled().await;

    *shared.state.lock() = SessionState::Closing;
    let reason = shared
        .close_reason
        .lock()
        .clone()
        .unwrap_or(CloseReason::ClientDisconnected);
    info!(session_id = %shared.ctx.session_id, %reason, "closing session");

    // Fatal errors are surfaced to the client before the disconnect.
    match &reason {
        CloseReason::UpstreamError(message) | CloseReason::ProtocolViolation(message) => {
            let _ = notices
                .send(SessionNotice::Fault {
                    message: message.clone(),
                })
                .await;
        }
        _ => {}
    }

    let prompt_name = sender.prompt_name().to_string();
    let audio_content = shared.audio_content.lock().take();
    if let Some(content) = audio_content
        && let Err(e) = sender
            .send_control(ControlEvent::ContentEnd {
                prompt_name: prompt_name.clone(),
                content_name: content,
            })
            .await
    {
        warn!(error = %e, "failed to close audio content during teardown");
    }
    if let Err(e) = sender
        .send_control(ControlEvent::PromptEnd {
            prompt_name: prompt_name.clone(),
        })
        .await
    {
        warn!(error = %e, "failed to send prompt end during teardown");
    }
    if let Err(e) = sender.send_control(ControlEvent::SessionEnd {}).await {
        warn!(error = %e, "failed to send session end during teardown");
    }

    client.close().await;

    let log = {
        let mut transcript = shared.transcript.lock();
        transcript.finish();
        transcript.clone()
    };
    if let Err(e) = store.flush(&log).await {
        error!(
            session_id = %shared.ctx.session_id,
            error = %e,
            "transcript flush failed"
        );
    }

    *shared.state.lock() = SessionState::Closed;
    let _ = notices.send(SessionNotice::Closed).await;
    info!(session_id = %shared.ctx.session_id, "session closed");
}
