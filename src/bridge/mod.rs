//! Session bridging between client transports and the conversation backend.
//!
//! - `signaling` - JSON control messages exchanged with browser clients
//! - `transport` - Client transport traits
//! - `peer` - Peer-connection abstraction used during negotiation
//! - `state` - Session phase machine
//! - `outbound` - Client delivery queue with interruption support
//! - `session` - The session bridge itself

pub mod outbound;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod state;
pub mod transport;

pub use outbound::{DEFAULT_MAX_PENDING_OUTPUTS, OutboundQueue, QueueError, packetize};
pub use peer::{
    PeerConnection, PeerError, PeerFactory, PeerResult, SocketMediaPeer, SocketMediaPeerFactory,
};
pub use session::{
    CloseReason, SessionBridge, SessionError, SessionHandle, SessionReport, SessionSettings,
};
pub use signaling::{
    IceCandidate, ServerMessage, SignalingMessage, SignalingValidationError, TranscriptRole,
};
pub use state::{PhaseInput, SessionPhase, SessionStatus, StreamState, TransportState};
pub use transport::{
    ClientEvent, ClientOutput, ClientSink, ClientSource, TransportError, TransportResult,
};
