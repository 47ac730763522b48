//! Base traits and types for conversation backends.
//!
//! A conversation backend is one ordered, bidirectional stream per session:
//! the bridge pushes a configuration message followed by audio, and reads a
//! closed set of [`ConversationEvent`]s back. The stream is split into a
//! sending and a receiving half so both directions make progress
//! independently.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by a conversation stream.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Could not establish the stream
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid backend configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Write to the stream failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Read from the stream failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The backend reported an error on the stream
    #[error("Backend error: {0}")]
    Remote(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Send half already closed
    #[error("Stream closed")]
    Closed,
}

/// Result type for conversation operations.
pub type ConversationResult<T> = Result<T, ConversationError>;

// =============================================================================
// Stream Formats
// =============================================================================

/// Sample encoding of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Signed 16-bit little-endian PCM
    #[default]
    Linear16,
    Mulaw,
    Alaw,
}

impl AudioEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Linear16 => 2,
            Self::Mulaw | Self::Alaw => 1,
        }
    }
}

/// Audio format descriptor sent to the backend for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub encoding: AudioEncoding,
    pub channels: u16,
}

impl StreamFormat {
    pub fn linear16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            encoding: AudioEncoding::Linear16,
            channels: 1,
        }
    }

    /// Bytes of audio per millisecond.
    pub fn bytes_per_ms(&self) -> usize {
        self.sample_rate as usize * self.encoding.bytes_per_sample() * self.channels as usize
            / 1000
    }

    /// Playback duration of `bytes` of audio in milliseconds.
    pub fn duration_ms(&self, bytes: usize) -> u64 {
        match self.bytes_per_ms() {
            0 => 0,
            per_ms => (bytes / per_ms) as u64,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{}Hz/{}ch",
            self.encoding, self.sample_rate, self.channels
        )
    }
}

// =============================================================================
// Requests and Events
// =============================================================================

/// First message on every conversation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfiguration {
    pub assistant_id: u64,
    pub session_id: String,
    pub input_format: StreamFormat,
    pub output_format: StreamFormat,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Messages the bridge sends to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationRequest {
    Configure(ConversationConfiguration),
    /// Raw samples in the negotiated input format
    Audio(Bytes),
    /// Text typed by the user
    Text { id: String, text: String },
}

/// Payload of an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantContent {
    Audio(Bytes),
    Text(String),
}

/// Kind of interruption reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionKind {
    /// The user's words were recognized over assistant speech
    #[default]
    Word,
    /// Voice activity was detected over assistant speech
    Vad,
}

/// Control instruction issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    EndConversation,
    #[serde(other)]
    Unknown,
}

/// Events read from the backend, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// The backend accepted the configuration message
    Configuration { conversation_id: String },
    AssistantMessage {
        id: String,
        completed: bool,
        content: AssistantContent,
    },
    UserMessage {
        id: String,
        completed: bool,
        text: String,
    },
    Interruption(InterruptionKind),
    Directive(DirectiveKind),
}

impl ConversationEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::AssistantMessage {
                content: AssistantContent::Audio(_),
                ..
            } => "assistant_audio",
            Self::AssistantMessage {
                content: AssistantContent::Text(_),
                ..
            } => "assistant_text",
            Self::UserMessage { .. } => "user_text",
            Self::Interruption(_) => "interruption",
            Self::Directive(_) => "directive",
        }
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Sending half of a conversation stream.
#[async_trait]
pub trait ConversationSender: Send {
    async fn send(&mut self, request: ConversationRequest) -> ConversationResult<()>;

    /// Signals end of input. The receiving half keeps delivering events until
    /// the backend finishes.
    async fn close(&mut self) -> ConversationResult<()>;
}

/// Receiving half of a conversation stream.
#[async_trait]
pub trait ConversationReceiver: Send {
    /// Next event, or `None` once the backend has ended the stream.
    async fn recv(&mut self) -> Option<ConversationResult<ConversationEvent>>;
}

/// An open conversation stream.
pub struct ConversationStream {
    pub sender: Box<dyn ConversationSender>,
    pub receiver: Box<dyn ConversationReceiver>,
}

/// Opens conversation streams.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Opens a new stream for `session_id`.
    async fn open(&self, session_id: &str) -> ConversationResult<ConversationStream>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
