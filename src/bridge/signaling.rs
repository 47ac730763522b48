//! Client signaling message types
//!
//! JSON text messages exchanged with browser clients over the signaling
//! WebSocket. Media itself does not travel in these messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum allowed size for an SDP body (64 KB)
pub const MAX_SDP_SIZE: usize = 64 * 1024;

/// Maximum allowed size for an ICE candidate line (4 KB)
pub const MAX_CANDIDATE_SIZE: usize = 4 * 1024;

/// Maximum allowed size for typed text (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum number of metadata entries on `configure`
pub const MAX_METADATA_ENTRIES: usize = 64;

// =============================================================================
// Shared Types
// =============================================================================

/// One ICE candidate as produced by `RTCPeerConnection.onicecandidate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Speaker of a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Signaling messages sent by the client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Session description offer
    Offer { sdp: String },

    /// Session description answer to a server offer
    Answer { sdp: String },

    /// Trickled ICE candidate
    IceCandidate(IceCandidate),

    /// Selects the assistant and attaches free-form metadata
    Configure {
        assistant_id: u64,
        #[serde(default)]
        metadata: HashMap<String, serde_json::Value>,
    },

    /// Text typed by the user
    Content {
        text: String,
        #[serde(default)]
        message_id: Option<String>,
    },

    /// Client is leaving
    Disconnect,
}

impl SignalingMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate(_) => "ice_candidate",
            Self::Configure { .. } => "configure",
            Self::Content { .. } => "content",
            Self::Disconnect => "disconnect",
        }
    }

    /// Validates message field sizes to prevent resource exhaustion attacks.
    pub fn validate_size(&self) -> Result<(), SignalingValidationError> {
        match self {
            Self::Offer { sdp } | Self::Answer { sdp } => {
                check_size(SignalingField::Sdp, sdp.len(), MAX_SDP_SIZE)
            }
            Self::IceCandidate(candidate) => check_size(
                SignalingField::Candidate,
                candidate.candidate.len(),
                MAX_CANDIDATE_SIZE,
            ),
            Self::Configure { metadata, .. } => check_size(
                SignalingField::Metadata,
                metadata.len(),
                MAX_METADATA_ENTRIES,
            ),
            Self::Content { text, .. } => check_size(SignalingField::Text, text.len(), MAX_TEXT_SIZE),
            Self::Disconnect => Ok(()),
        }
    }
}

fn check_size(
    field: SignalingField,
    size: usize,
    max: usize,
) -> Result<(), SignalingValidationError> {
    if size > max {
        return Err(SignalingValidationError::TooLarge { field, size, max });
    }
    Ok(())
}

/// Field that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingField {
    Sdp,
    Candidate,
    Metadata,
    Text,
}

/// Validation errors for signaling messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingValidationError {
    TooLarge {
        field: SignalingField,
        size: usize,
        max: usize,
    },
}

impl std::fmt::Display for SignalingValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { field, size, max } => {
                write!(f, "{:?} too large: {} (max: {})", field, size, max)
            }
        }
    }
}

impl std::error::Error for SignalingValidationError {}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Signaling messages sent to the client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Answer to the client's offer
    Answer { sdp: String },

    /// Server-side ICE candidate
    IceCandidate(IceCandidate),

    /// The conversation backend accepted the session
    Configured { session_id: String },

    /// Transcript of either side of the conversation
    Transcript {
        role: TranscriptRole,
        text: String,
        completed: bool,
    },

    /// Discard any audio buffered for playback
    Interruption {},

    /// Error the client can act on
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_deserialization() {
        let msg: SignalingMessage =
            serde_json::from_str(r#"{"type": "offer", "sdp": "v=0"}"#).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Offer {
                sdp: "v=0".to_string()
            }
        );
    }

    #[test]
    fn test_ice_candidate_deserialization() {
        let msg: SignalingMessage = serde_json::from_value(json!({
            "type": "ice_candidate",
            "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 49152 typ host",
            "sdp_mid": "0",
            "sdp_mline_index": 0
        }))
        .unwrap();

        match msg {
            SignalingMessage::IceCandidate(candidate) => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("Expected ice_candidate, got {other:?}"),
        }
    }

    #[test]
    fn test_configure_metadata_defaults_empty() {
        let msg: SignalingMessage =
            serde_json::from_str(r#"{"type": "configure", "assistant_id": 7}"#).unwrap();
        match msg {
            SignalingMessage::Configure {
                assistant_id,
                metadata,
            } => {
                assert_eq!(assistant_id, 7);
                assert!(metadata.is_empty());
            }
            other => panic!("Expected configure, got {other:?}"),
        }
    }

    #[test]
    fn test_disconnect_deserialization() {
        let msg: SignalingMessage = serde_json::from_str(r#"{"type": "disconnect"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Disconnect);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<SignalingMessage>(r#"{"type": "renegotiate"}"#).is_err());
    }

    #[test]
    fn test_server_message_serialization() {
        let json = serde_json::to_value(ServerMessage::Transcript {
            role: TranscriptRole::Assistant,
            text: "Hello".to_string(),
            completed: true,
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"type": "transcript", "role": "assistant", "text": "Hello", "completed": true})
        );

        let json = serde_json::to_value(ServerMessage::Interruption {}).unwrap();
        assert_eq!(json, json!({"type": "interruption"}));
    }

    #[test]
    fn test_validation_sdp_exceeds_limit() {
        let msg = SignalingMessage::Offer {
            sdp: "a".repeat(MAX_SDP_SIZE + 1),
        };
        match msg.validate_size().unwrap_err() {
            SignalingValidationError::TooLarge { field, .. } => {
                assert_eq!(field, SignalingField::Sdp)
            }
        }
    }

    #[test]
    fn test_validation_text_within_limit() {
        let msg = SignalingMessage::Content {
            text: "a".repeat(MAX_TEXT_SIZE),
            message_id: None,
        };
        assert!(msg.validate_size().is_ok());
    }
}
