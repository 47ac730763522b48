//! WebSocket conversation backend against a local mock server.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use voice_bridge::core::conversation::{
    AssistantContent, ConversationBackend, ConversationConfiguration, ConversationError,
    ConversationEvent, ConversationReceiver, ConversationRequest, ConversationResult,
    DirectiveKind, InterruptionKind, StreamFormat, WebSocketBackend,
};

const WAIT: Duration = Duration::from_secs(5);

/// Upgrade headers the mock server saw.
#[derive(Default, Debug, Clone)]
struct SeenHeaders {
    authorization: Option<String>,
    session_id: Option<String>,
}

/// Accepts one connection, forwards every text frame it receives as JSON,
/// then replies with `replies` and closes.
async fn mock_backend(
    replies: Vec<Message>,
) -> (String, mpsc::UnboundedReceiver<Value>, Arc<Mutex<SeenHeaders>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/talk", listener.local_addr().unwrap());
    let (received_tx, received_rx) = mpsc::unbounded_channel();
    let seen = Arc::new(Mutex::new(SeenHeaders::default()));
    let seen_headers = seen.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            *seen_headers.lock() = SeenHeaders {
                authorization: header("authorization"),
                session_id: header("x-session-id"),
            };
            Ok::<_, ErrorResponse>(response)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        let (mut write, mut read) = ws.split();

        // Wait for the configuration before replying.
        if let Some(Ok(Message::Text(text))) = read.next().await {
            let _ = received_tx.send(serde_json::from_str(text.as_str()).unwrap());
        }
        for reply in replies {
            write.send(reply).await.unwrap();
        }

        while let Some(Ok(message)) = read.next().await {
            match message {
                Message::Text(text) => {
                    let _ = received_tx.send(serde_json::from_str(text.as_str()).unwrap());
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        let _ = write.close().await;
    });

    (url, received_rx, seen)
}

fn configuration() -> ConversationRequest {
    ConversationRequest::Configure(ConversationConfiguration {
        assistant_id: 42,
        session_id: "call-1".to_string(),
        input_format: StreamFormat::linear16(8000),
        output_format: StreamFormat::linear16(8000),
        metadata: Default::default(),
    })
}

async fn next_json(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for the mock backend")
        .expect("mock backend stopped")
}

async fn next_event(
    receiver: &mut Box<dyn ConversationReceiver>,
) -> Option<ConversationResult<ConversationEvent>> {
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for an event")
}

#[tokio::test]
async fn test_requests_are_sent_in_order() {
    let (url, mut received, seen) = mock_backend(Vec::new()).await;
    let backend = WebSocketBackend::new(&url)
        .unwrap()
        .with_api_key(Some("secret".to_string()));

    let mut stream = backend.open("call-1").await.unwrap();
    stream.sender.send(configuration()).await.unwrap();
    stream
        .sender
        .send(ConversationRequest::Audio(Bytes::from_static(&[1, 2, 3])))
        .await
        .unwrap();
    stream
        .sender
        .send(ConversationRequest::Text {
            id: "m-1".to_string(),
            text: "hello".to_string(),
        })
        .await
        .unwrap();

    let first = next_json(&mut received).await;
    assert_eq!(first["type"], "configuration");
    assert_eq!(first["assistant_id"], 42);
    assert_eq!(first["session_id"], "call-1");
    assert_eq!(first["output_config"]["sample_rate"], 8000);

    assert_eq!(
        next_json(&mut received).await,
        json!({"type": "audio", "audio": "AQID"})
    );
    assert_eq!(
        next_json(&mut received).await,
        json!({"type": "text", "id": "m-1", "text": "hello"})
    );

    let headers = seen.lock().clone();
    assert_eq!(headers.authorization.as_deref(), Some("Bearer secret"));
    assert_eq!(headers.session_id.as_deref(), Some("call-1"));

    stream.sender.close().await.unwrap();
    assert!(matches!(
        stream.sender.send(configuration()).await,
        Err(ConversationError::Closed)
    ));
}

#[tokio::test]
async fn test_events_are_decoded_in_arrival_order() {
    let replies = vec![
        Message::Text(json!({"type": "configuration", "conversation_id": "conv-9"}).to_string().into()),
        Message::Text(
            json!({"type": "assistant_message", "id": "a-1", "audio": "AAEC"})
                .to_string()
                .into(),
        ),
        Message::Text(json!({"type": "something_new"}).to_string().into()),
        Message::Text(
            json!({"type": "user_message", "id": "u-1", "completed": true, "text": "stop"})
                .to_string()
                .into(),
        ),
        Message::Text(
            json!({"type": "interruption", "interruption_type": "vad"})
                .to_string()
                .into(),
        ),
        Message::Text(
            json!({"type": "directive", "directive_type": "end_conversation"})
                .to_string()
                .into(),
        ),
        Message::Text(json!({"type": "error", "message": "quota exceeded"}).to_string().into()),
    ];
    let (url, _received, _) = mock_backend(replies).await;
    let backend = WebSocketBackend::new(&url).unwrap();

    let mut stream = backend.open("call-2").await.unwrap();
    stream.sender.send(configuration()).await.unwrap();

    let receiver = &mut stream.receiver;

    assert_eq!(
        next_event(receiver).await.unwrap().unwrap(),
        ConversationEvent::Configuration {
            conversation_id: "conv-9".to_string()
        }
    );
    assert_eq!(
        next_event(receiver).await.unwrap().unwrap(),
        ConversationEvent::AssistantMessage {
            id: "a-1".to_string(),
            completed: false,
            content: AssistantContent::Audio(Bytes::from_static(&[0, 1, 2])),
        }
    );
    // Unknown message types are skipped.
    assert_eq!(
        next_event(receiver).await.unwrap().unwrap(),
        ConversationEvent::UserMessage {
            id: "u-1".to_string(),
            completed: true,
            text: "stop".to_string(),
        }
    );
    assert_eq!(
        next_event(receiver).await.unwrap().unwrap(),
        ConversationEvent::Interruption(InterruptionKind::Vad)
    );
    assert_eq!(
        next_event(receiver).await.unwrap().unwrap(),
        ConversationEvent::Directive(DirectiveKind::EndConversation)
    );
    match next_event(receiver).await {
        Some(Err(ConversationError::Remote(message))) => assert_eq!(message, "quota exceeded"),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_ends_event_stream() {
    let (url, mut received, _) = mock_backend(Vec::new()).await;
    let backend = WebSocketBackend::new(&url).unwrap();

    let mut stream = backend.open("call-3").await.unwrap();
    stream.sender.send(configuration()).await.unwrap();
    next_json(&mut received).await;

    stream.sender.close().await.unwrap();
    let end = tokio::time::timeout(WAIT, stream.receiver.recv())
        .await
        .expect("receive half did not finish");
    assert!(end.is_none(), "unexpected event {end:?}");
}
