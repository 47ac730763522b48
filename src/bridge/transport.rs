//! Client-facing transport abstraction.
//!
//! Each transport is split into a [`ClientSource`] read by the inbound task
//! and a [`ClientSink`] owned by the session writer, so a slow client never
//! stalls ingestion.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

use super::signaling::{ServerMessage, SignalingMessage};
use crate::core::audiosocket::ProtocolError;

/// Errors raised by a client transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The connection did not open the way the wire protocol requires
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The client reported a failure of its own
    #[error("Remote error: {0}")]
    Remote(String),

    /// The client stopped draining output
    #[error("Client is not keeping up: {0} outputs pending")]
    Backlog(usize),

    #[error("Transport closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Something the client sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Socket-based handshake carrying the call id
    Announce { call_id: String },
    Signal(SignalingMessage),
    /// One unit of raw media as read from the transport
    Media(Bytes),
    Hangup,
}

/// Something to deliver to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOutput {
    /// One packet of assistant audio
    Audio(Bytes),
    Signal(ServerMessage),
    /// End the call from the server side
    Hangup,
}

impl ClientOutput {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}

/// Read half of a client transport.
#[async_trait]
pub trait ClientSource: Send {
    /// Next client event, or `None` once the client has gone away.
    async fn recv(&mut self) -> TransportResult<Option<ClientEvent>>;
}

/// Write half of a client transport.
#[async_trait]
pub trait ClientSink: Send {
    async fn send(&mut self, output: ClientOutput) -> TransportResult<()>;

    async fn close(&mut self) -> TransportResult<()>;

    /// Fixed audio packet size, if the wire needs one.
    fn audio_packet_size(&self) -> Option<usize> {
        None
    }

    /// Playback clock for audio packets, if the client expects real-time pacing.
    fn packet_interval(&self) -> Option<Duration> {
        None
    }
}
