//! Conversation backend streams.
//!
//! # Protocol
//!
//! The first request on every stream is [`ConversationRequest::Configure`];
//! audio chunks and typed text follow in the order the bridge produced them.
//! Events come back as the closed [`ConversationEvent`] union.

mod base;
pub mod messages;
mod websocket;

pub use base::{
    AssistantContent, AudioEncoding, ConversationBackend, ConversationConfiguration,
    ConversationError, ConversationEvent, ConversationReceiver, ConversationRequest,
    ConversationResult, ConversationSender, ConversationStream, DirectiveKind, InterruptionKind,
    StreamFormat,
};
pub use websocket::{DEFAULT_CONNECT_TIMEOUT, WebSocketBackend};
