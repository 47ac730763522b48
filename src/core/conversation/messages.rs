//! Conversation backend WebSocket message types.
//!
//! Every message is a JSON text frame tagged by `type`. Audio travels base64
//! encoded inside the JSON body.
//!
//! Client events (bridge -> backend):
//! - configuration - assistant id and stream formats, always first
//! - audio - a chunk of input audio
//! - text - text typed by the user
//!
//! Server events (backend -> bridge):
//! - configuration - configuration accepted
//! - assistant_message - assistant audio or text
//! - user_message - user transcript
//! - interruption - barge-in
//! - directive - control instruction
//! - error - backend failure

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::base::{
    AssistantContent, ConversationConfiguration, ConversationError, ConversationEvent,
    ConversationRequest, ConversationResult, DirectiveKind, InterruptionKind, StreamFormat,
};

// =============================================================================
// Client Events
// =============================================================================

/// Events sent to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Configuration {
        assistant_id: u64,
        session_id: String,
        input_config: StreamFormat,
        output_config: StreamFormat,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        metadata: HashMap<String, serde_json::Value>,
    },
    Audio {
        /// Base64 encoded samples
        audio: String,
    },
    Text {
        id: String,
        text: String,
    },
}

impl From<ConversationRequest> for ClientEvent {
    fn from(request: ConversationRequest) -> Self {
        match request {
            ConversationRequest::Configure(ConversationConfiguration {
                assistant_id,
                session_id,
                input_format,
                output_format,
                metadata,
            }) => Self::Configuration {
                assistant_id,
                session_id,
                input_config: input_format,
                output_config: output_format,
                metadata,
            },
            ConversationRequest::Audio(samples) => Self::Audio {
                audio: BASE64_STANDARD.encode(&samples),
            },
            ConversationRequest::Text { id, text } => Self::Text { id, text },
        }
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Events received from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Configuration {
        conversation_id: String,
    },
    AssistantMessage {
        #[serde(default)]
        id: String,
        #[serde(default)]
        completed: bool,
        /// Base64 encoded samples in the negotiated output format
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    UserMessage {
        #[serde(default)]
        id: String,
        #[serde(default)]
        completed: bool,
        text: String,
    },
    Interruption {
        #[serde(default)]
        interruption_type: InterruptionKind,
    },
    Directive {
        directive_type: DirectiveKind,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// Converts a wire event into a conversation event.
    ///
    /// Backend `error` events become [`ConversationError::Remote`].
    pub fn into_event(self) -> ConversationResult<ConversationEvent> {
        match self {
            Self::Configuration { conversation_id } => {
                Ok(ConversationEvent::Configuration { conversation_id })
            }
            Self::AssistantMessage {
                id,
                completed,
                audio,
                text,
            } => {
                let content = match (audio, text) {
                    (Some(audio), _) => AssistantContent::Audio(
                        BASE64_STANDARD
                            .decode(audio)
                            .map_err(|e| ConversationError::SerializationError(e.to_string()))?
                            .into(),
                    ),
                    (None, Some(text)) => AssistantContent::Text(text),
                    (None, None) => {
                        return Err(ConversationError::SerializationError(
                            "assistant_message without audio or text".to_string(),
                        ));
                    }
                };
                Ok(ConversationEvent::AssistantMessage {
                    id,
                    completed,
                    content,
                })
            }
            Self::UserMessage {
                id,
                completed,
                text,
            } => Ok(ConversationEvent::UserMessage {
                id,
                completed,
                text,
            }),
            Self::Interruption { interruption_type } => {
                Ok(ConversationEvent::Interruption(interruption_type))
            }
            Self::Directive { directive_type } => Ok(ConversationEvent::Directive(directive_type)),
            Self::Error { message } => Err(ConversationError::Remote(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_configuration_serialization() {
        let event = ClientEvent::from(ConversationRequest::Configure(ConversationConfiguration {
            assistant_id: 42,
            session_id: "s-1".to_string(),
            input_format: StreamFormat::linear16(8000),
            output_format: StreamFormat::linear16(8000),
            metadata: HashMap::new(),
        }));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "configuration");
        assert_eq!(json["assistant_id"], 42);
        assert_eq!(json["input_config"]["sample_rate"], 8000);
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_audio_is_base64() {
        let event = ClientEvent::from(ConversationRequest::Audio(Bytes::from_static(&[1, 2, 3])));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"type": "audio", "audio": "AQID"}));
    }

    #[test]
    fn test_assistant_audio_event() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "assistant_message",
            "id": "m1",
            "audio": "AQID"
        }))
        .unwrap();

        match event.into_event().unwrap() {
            ConversationEvent::AssistantMessage {
                id,
                completed,
                content: AssistantContent::Audio(audio),
            } => {
                assert_eq!(id, "m1");
                assert!(!completed);
                assert_eq!(audio.as_ref(), &[1, 2, 3]);
            }
            other => panic!("Expected assistant audio, got {other:?}"),
        }
    }

    #[test]
    fn test_assistant_message_without_content() {
        let event: ServerEvent =
            serde_json::from_value(json!({"type": "assistant_message", "id": "m1"})).unwrap();
        assert!(matches!(
            event.into_event(),
            Err(ConversationError::SerializationError(_))
        ));
    }

    #[test]
    fn test_interruption_defaults_to_word() {
        let event: ServerEvent = serde_json::from_value(json!({"type": "interruption"})).unwrap();
        assert_eq!(
            event.into_event().unwrap(),
            ConversationEvent::Interruption(InterruptionKind::Word)
        );
    }

    #[test]
    fn test_end_conversation_directive() {
        let event: ServerEvent = serde_json::from_value(json!({
            "type": "directive",
            "directive_type": "end_conversation"
        }))
        .unwrap();
        assert_eq!(
            event.into_event().unwrap(),
            ConversationEvent::Directive(DirectiveKind::EndConversation)
        );
    }

    #[test]
    fn test_error_event_is_remote_error() {
        let event: ServerEvent =
            serde_json::from_value(json!({"type": "error", "message": "quota exceeded"})).unwrap();
        match event.into_event() {
            Err(ConversationError::Remote(message)) => assert_eq!(message, "quota exceeded"),
            other => panic!("Expected remote error, got {other:?}"),
        }
    }
}
