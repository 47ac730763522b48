//! WebSocket conversation backend client.
//!
//! Opens one WebSocket per session, splits it, and exposes the halves as a
//! [`ConversationSender`] and a [`ConversationReceiver`].

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::base::{
    AssistantContent, ConversationBackend, ConversationError, ConversationEvent,
    ConversationReceiver, ConversationRequest, ConversationResult, ConversationSender,
    ConversationStream,
};
use super::messages::{ClientEvent, ServerEvent};

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Header carrying the bridge session id on the upgrade request.
const SESSION_ID_HEADER: &str = "x-session-id";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Conversation backend reached over WebSocket.
#[derive(Clone)]
pub struct WebSocketBackend {
    url: Url,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl WebSocketBackend {
    /// Creates a backend for a `ws://` or `wss://` endpoint.
    pub fn new(url: &str) -> ConversationResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| ConversationError::InvalidConfiguration(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConversationError::InvalidConfiguration(format!(
                "unsupported scheme '{}', expected ws or wss",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            api_key: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl std::fmt::Debug for WebSocketBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketBackend")
            .field("url", &self.url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[async_trait]
impl ConversationBackend for WebSocketBackend {
    async fn open(&self, session_id: &str) -> ConversationResult<ConversationStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConversationError::ConnectionFailed(e.to_string()))?;

        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| ConversationError::InvalidConfiguration(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        let session_header = HeaderValue::from_str(session_id)
            .map_err(|e| ConversationError::InvalidConfiguration(e.to_string()))?;
        request
            .headers_mut()
            .insert(SESSION_ID_HEADER, session_header);

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    ConversationError::Timeout(format!(
                        "backend handshake exceeded {}ms",
                        self.connect_timeout.as_millis()
                    ))
                })?
                .map_err(|e| ConversationError::ConnectionFailed(e.to_string()))?;

        info!(session_id, backend = %self.url, "Connected to conversation backend");

        let (sink, stream) = ws_stream.split();
        Ok(ConversationStream {
            sender: Box::new(WebSocketSender {
                sink,
                closed: false,
            }),
            receiver: Box::new(WebSocketReceiver { stream }),
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

struct WebSocketSender {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl ConversationSender for WebSocketSender {
    async fn send(&mut self, request: ConversationRequest) -> ConversationResult<()> {
        if self.closed {
            return Err(ConversationError::Closed);
        }
        let json = serde_json::to_string(&ClientEvent::from(request))
            .map_err(|e| ConversationError::SerializationError(e.to_string()))?;
        self.sink
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ConversationError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> ConversationResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink
            .close()
            .await
            .map_err(|e| ConversationError::SendFailed(e.to_string()))
    }
}

struct WebSocketReceiver {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl ConversationReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<ConversationResult<ConversationEvent>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    let event = match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Skipping unrecognized backend message: {}", e);
                            continue;
                        }
                    };
                    match event.into_event() {
                        Err(ConversationError::SerializationError(e)) => {
                            warn!("Skipping malformed backend event: {}", e);
                        }
                        result => return Some(result),
                    }
                }
                Ok(Message::Binary(data)) => {
                    return Some(Ok(ConversationEvent::AssistantMessage {
                        id: String::new(),
                        completed: false,
                        content: AssistantContent::Audio(data),
                    }));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Conversation backend closed the stream");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(e) => return Some(Err(ConversationError::ReceiveFailed(e.to_string()))),
            }
        }
    }
}
