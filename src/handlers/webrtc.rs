//! Browser signaling WebSocket handler
//!
//! Text frames carry JSON signaling messages tagged by `type`; binary frames
//! carry the media track's PCM in the session's configured format.

use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bridge::{
    ClientEvent, ClientOutput, ClientSink, ClientSource, SignalingMessage, TransportError,
    TransportResult,
};
use crate::state::AppState;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Signaling WebSocket handler
///
/// Upgrades the HTTP connection and runs one bridged session over it.
pub async fn webrtc_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("Signaling WebSocket connection upgrade requested");

    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_signaling_socket(socket, state))
}

async fn handle_signaling_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();
    info!(session_id = %session_id, "Signaling WebSocket connection established");

    let peer = match state.peers.create(&session_id) {
        Ok(peer) => peer,
        Err(e) => {
            error!(session_id = %session_id, "Failed to create peer connection: {}", e);
            return;
        }
    };

    let bridge = state
        .session(session_id, state.config.webrtc_session_settings())
        .with_peer(peer);

    let (sink, stream) = socket.split();
    let report = state
        .run_session(
            bridge,
            Box::new(SignalingSource::new(stream)),
            Box::new(SignalingSink::new(sink)),
        )
        .await;

    info!(
        session_id = %report.session_id,
        reason = %report.reason,
        "Signaling WebSocket session finished"
    );
}

/// Read half of the signaling socket.
pub struct SignalingSource {
    stream: SplitStream<WebSocket>,
}

impl SignalingSource {
    pub fn new(stream: SplitStream<WebSocket>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl ClientSource for SignalingSource {
    async fn recv(&mut self) -> TransportResult<Option<ClientEvent>> {
        while let Some(message) = self.stream.next().await {
            let message = message.map_err(|e| TransportError::WebSocket(e.to_string()))?;

            match message {
                Message::Text(text) => match serde_json::from_str::<SignalingMessage>(&text) {
                    Ok(signal) => return Ok(Some(ClientEvent::Signal(signal))),
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed signaling message");
                    }
                },
                Message::Binary(data) => return Ok(Some(ClientEvent::Media(data))),
                Message::Close(frame) => {
                    debug!(?frame, "Client closed the signaling socket");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok(None)
    }
}

/// Write half of the signaling socket.
pub struct SignalingSink {
    sink: SplitSink<WebSocket, Message>,
}

impl SignalingSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ClientSink for SignalingSink {
    async fn send(&mut self, output: ClientOutput) -> TransportResult<()> {
        let message = match output {
            ClientOutput::Audio(packet) => Message::Binary(packet),
            ClientOutput::Signal(signal) => {
                let json = serde_json::to_string(&signal)
                    .map_err(|e| TransportError::WebSocket(e.to_string()))?;
                Message::Text(json.into())
            }
            ClientOutput::Hangup => Message::Close(None),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
