//! Voice WebSocket handler.
//!
//! Terminates the client-facing streaming connection: inbound frames become
//! session commands, session notices become client messages. One socket
//! carries exactly one session.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use base64::prelude::*;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::AgentProfile;
use crate::core::session::{
    CloseReason, SessionArgs, SessionContext, SessionHandle, SessionNotice, compose_system_prompt,
};
use crate::core::speech::{SpeechStreamClient, WsTransport};
use crate::core::tools::{ToolBridge, default_tool_schema};
use crate::errors::AppError;
use crate::state::AppState;

use super::messages::{VoiceIncomingMessage, VoiceMessageRoute, VoiceOutgoingMessage};

/// Channel buffer size for the socket sender task.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How often the idle check runs.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct VoiceQuery {
    /// API key for authentication (required when the server enforces keys).
    pub api_key: Option<String>,
}

struct VoiceConnection {
    agent_id: String,
    actor_id: String,
    session_id: String,
    profile: AgentProfile,
}

/// Voice session WebSocket handler.
///
/// Authorizes the connection, then upgrades it and runs one session until
/// the client ends it, disconnects, idles out, or the upstream fails.
pub async fn voice_handler(
    ws: WebSocketUpgrade,
    Path((agent_id, actor_id, session_id)): Path<(String, String, String)>,
    Query(query): Query<VoiceQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let profile = match state
        .authorizer
        .authorize(&agent_id, query.api_key.as_deref())
        .await
    {
        Ok(profile) => profile,
        Err(e) => {
            warn!(agent_id = %agent_id, error = %e, "voice connection rejected");
            return AppError::from(e).into_response();
        }
    };

    if state.registry.contains(&session_id) {
        return AppError::Conflict(format!("session {session_id} is already active"))
            .into_response();
    }

    info!(
        agent_id = %agent_id,
        session_id = %session_id,
        "voice WebSocket connection upgrade requested"
    );

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            handle_voice_socket(
                socket,
                state,
                VoiceConnection {
                    agent_id,
                    actor_id,
                    session_id,
                    profile,
                },
            )
        })
}

/// Drive one voice session over an established socket.
async fn handle_voice_socket(socket: WebSocket, state: Arc<AppState>, conn: VoiceConnection) {
    info!(session_id = %conn.session_id, "voice WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<VoiceMessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, VoiceMessageRoute::Close);

            let result = match route {
                VoiceMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                VoiceMessageRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                VoiceMessageRoute::Close => {
                    info!("Closing voice WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };

            if let Err(e) = result {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    let (notice_tx, mut notice_rx) =
        mpsc::channel::<SessionNotice>(state.config.session.notice_queue_capacity);

    let mut handle = match start_voice_session(&state, &conn, notice_tx).await {
        Ok(handle) => handle,
        Err(message) => {
            error!(session_id = %conn.session_id, %message, "failed to start voice session");
            let _ = message_tx
                .send(VoiceMessageRoute::Outgoing(VoiceOutgoingMessage::Error {
                    message,
                }))
                .await;
            let _ = message_tx.send(VoiceMessageRoute::Close).await;
            let _ = sender_task.await;
            return;
        }
    };
    state.registry.insert(handle.session_ref());

    let idle_timeout = Duration::from_secs(state.config.session.idle_timeout_seconds);
    let mut last_activity = std::time::Instant::now();
    let mut close_reason = CloseReason::ClientDisconnected;

    loop {
        select! {
            notice = notice_rx.recv() => match notice {
                None | Some(SessionNotice::Closed) => break,
                Some(notice) => {
                    if let Some(route) = route_for_notice(notice)
                        && message_tx.send(route).await.is_err()
                    {
                        // Sender task died: the client is unreachable.
                        break;
                    }
                }
            },
            incoming = receiver.next() => {
                last_activity = std::time::Instant::now();
                match incoming {
                    Some(Ok(message)) => {
                        match process_client_message(message, &handle, &message_tx).await {
                            Flow::Continue => {}
                            Flow::End => {
                                close_reason = CloseReason::ClientEnd;
                                break;
                            }
                            Flow::Disconnected => break,
                        }
                    }
                    Some(Err(e)) => {
                        warn!("voice WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("voice WebSocket connection closed by client");
                        break;
                    }
                }
            },
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        session_id = %conn.session_id,
                        "connection idle for {}s, closing",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = message_tx
                        .send(VoiceMessageRoute::Outgoing(VoiceOutgoingMessage::Error {
                            message: "Connection closed due to inactivity".to_string(),
                        }))
                        .await;
                    close_reason = CloseReason::IdleTimeout;
                    break;
                }
                debug!("voice connection idle check - still active");
            }
        }
    }

    // Cleanup: deregister first so no frames route to a closing session.
    state.registry.remove(&conn.session_id);
    handle.shutdown(close_reason).await;

    // Teardown may have produced a final fault notice; forward it before
    // the close frame.
    while let Ok(notice) = notice_rx.try_recv() {
        if let SessionNotice::Fault { message } = notice {
            let _ = message_tx
                .send(VoiceMessageRoute::Outgoing(VoiceOutgoingMessage::Error {
                    message,
                }))
                .await;
        }
    }
    let _ = message_tx.send(VoiceMessageRoute::Close).await;
    let _ = sender_task.await;

    info!(session_id = %conn.session_id, "voice WebSocket connection terminated");
}

/// Build the upstream client, the tool bridge and the session itself.
async fn start_voice_session(
    state: &Arc<AppState>,
    conn: &VoiceConnection,
    notices: mpsc::Sender<SessionNotice>,
) -> Result<SessionHandle, String> {
    let transport = WsTransport::from_config(&state.config.speech)
        .map_err(|e| format!("speech transport: {e}"))?;
    let client = SpeechStreamClient::new(state.config.speech.clone(), Box::new(transport));

    let system_prompt = compose_system_prompt(
        &conn.profile.agent_name,
        conn.profile.voice_prompt.as_deref(),
        conn.profile.voice_personality.as_deref(),
    );
    let bridge = ToolBridge::new(
        state.tool_backend.clone(),
        conn.agent_id.clone(),
        conn.actor_id.clone(),
        conn.session_id.clone(),
        Duration::from_secs(state.config.tools.timeout_seconds),
    );
    let ctx = SessionContext {
        session_id: conn.session_id.clone(),
        agent_id: conn.agent_id.clone(),
        actor_id: conn.actor_id.clone(),
        input_sample_rate_hz: state.config.speech.input_sample_rate_hz,
        audio_queue_capacity: state.config.session.audio_queue_capacity,
    };

    SessionHandle::start(SessionArgs {
        ctx,
        client,
        system_prompt,
        tools: default_tool_schema(),
        bridge,
        store: state.transcripts.clone(),
        notices,
    })
    .await
    .map_err(|e| e.to_string())
}

enum Flow {
    Continue,
    End,
    Disconnected,
}

/// Process one incoming WebSocket message.
async fn process_client_message(
    message: Message,
    handle: &SessionHandle,
    message_tx: &mpsc::Sender<VoiceMessageRoute>,
) -> Flow {
    match message {
        Message::Binary(data) => {
            // Session closing is signalled via the notice channel; a failed
            // push here just means the frame arrived too late.
            let _ = handle.push_audio(data).await;
            Flow::Continue
        }
        Message::Text(text) => {
            match serde_json::from_str::<VoiceIncomingMessage>(&text) {
                Ok(incoming) => {
                    if let Err(e) = incoming.validate_size() {
                        warn!("message validation failed: {}", e);
                        let _ = message_tx
                            .send(VoiceMessageRoute::Outgoing(VoiceOutgoingMessage::Error {
                                message: e.to_string(),
                            }))
                            .await;
                        return Flow::Continue;
                    }
                    match incoming {
                        VoiceIncomingMessage::Audio { data } => {
                            match BASE64_STANDARD.decode(data.as_bytes()) {
                                Ok(pcm) => {
                                    let _ = handle.push_audio(Bytes::from(pcm)).await;
                                }
                                Err(e) => {
                                    let _ = message_tx
                                        .send(VoiceMessageRoute::Outgoing(
                                            VoiceOutgoingMessage::Error {
                                                message: format!("invalid base64 audio: {e}"),
                                            },
                                        ))
                                        .await;
                                }
                            }
                            Flow::Continue
                        }
                        VoiceIncomingMessage::End => {
                            info!(session_id = %handle.session_id(), "end signal received");
                            Flow::End
                        }
                    }
                }
                // Not JSON: plain-text audio control commands.
                Err(_) => {
                    match text.as_str().trim() {
                        "start_audio" => {
                            if let Err(e) = handle.start_audio().await {
                                warn!(error = %e, "failed to start audio input");
                            }
                        }
                        "stop_audio" => {
                            if let Err(e) = handle.stop_audio().await {
                                warn!(error = %e, "failed to stop audio input");
                            }
                        }
                        other => debug!(command = other, "ignoring unknown text command"),
                    }
                    Flow::Continue
                }
            }
        }
        Message::Ping(_) | Message::Pong(_) => Flow::Continue,
        Message::Close(_) => {
            info!("voice WebSocket close received");
            Flow::Disconnected
        }
    }
}

fn route_for_notice(notice: SessionNotice) -> Option<VoiceMessageRoute> {
    match notice {
        SessionNotice::Ready => Some(VoiceMessageRoute::Outgoing(VoiceOutgoingMessage::Ready)),
        SessionNotice::Audio(frame) => Some(VoiceMessageRoute::Audio(frame.pcm)),
        SessionNotice::Transcript { role, content } => Some(VoiceMessageRoute::Outgoing(
            VoiceOutgoingMessage::Transcript {
                role: role.to_string(),
                content,
            },
        )),
        SessionNotice::ToolCall { tool, input } => Some(VoiceMessageRoute::Outgoing(
            VoiceOutgoingMessage::ToolCall { tool, input },
        )),
        SessionNotice::ToolResult { tool, result } => Some(VoiceMessageRoute::Outgoing(
            VoiceOutgoingMessage::ToolResult { tool, result },
        )),
        SessionNotice::BargeIn => Some(VoiceMessageRoute::Outgoing(
            VoiceOutgoingMessage::BargeIn {
                message: "User interrupted".to_string(),
            },
        )),
        SessionNotice::Fault { message } => Some(VoiceMessageRoute::Outgoing(
            VoiceOutgoingMessage::Error { message },
        )),
        SessionNotice::Closed => None,
    }
}
