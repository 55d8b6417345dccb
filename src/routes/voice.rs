//! Voice WebSocket route configuration.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::voice::voice_handler;
use crate::state::AppState;

/// Create the voice WebSocket router
///
/// # Endpoint
///
/// `GET /voice/{agent_id}/{actor_id}/{session_id}` - WebSocket upgrade for
/// one live voice session.
///
/// # Protocol
///
/// After the upgrade, the gateway connects upstream and sends
/// `{"type": "ready"}` once the client may stream audio. Clients send raw
/// binary PCM frames or `{"type": "audio", "data": <base64>}` messages,
/// plus `{"type": "end"}` to finish; plain-text `start_audio` /
/// `stop_audio` toggle the inbound audio content block.
///
/// Server messages: `ready`, `transcript`, `tool_call`, `tool_result`,
/// `barge_in`, `error`, and raw binary audio frames.
///
/// # Authentication
///
/// `?api_key=...` is validated before the upgrade when key enforcement is
/// enabled.
pub fn create_voice_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/voice/{agent_id}/{actor_id}/{session_id}",
            get(voice_handler),
        )
        .layer(TraceLayer::new_for_http())
}
