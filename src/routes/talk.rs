//! Session route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::webrtc::webrtc_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the session router
///
/// # Endpoint
///
/// `GET /talk/webrtc` - WebSocket upgrade for a browser session
///
/// # Protocol
///
/// Clients send JSON text frames:
/// 1. `configure` to select the assistant
/// 2. `offer` with the session description, then `ice_candidate`s
/// 3. Binary frames with 16-bit PCM audio
///
/// Server responds with:
/// - `answer` to the offer
/// - `configured` once the conversation backend accepted the session
/// - `transcript` for user and assistant text
/// - Binary frames with assistant audio
/// - `interruption` when queued assistant audio was discarded
/// - `error` on failures
///
/// # Example
///
/// ```json
/// {"type": "configure", "assistant_id": 2214}
/// {"type": "offer", "sdp": "v=0\r\n..."}
/// ```
pub fn create_talk_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/talk/webrtc", get(webrtc_handler))
        .layer(TraceLayer::new_for_http())
}
