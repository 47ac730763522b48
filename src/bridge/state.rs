//! Session phase machine.
//!
//! ```text
//! Created --Accepted--> Negotiating --StreamAccepted--> Bridged
//!    |                       |                             |
//!    +-------Terminal--------+-----------Terminal----------+--> Draining --TeardownComplete--> Closed
//! ```

use std::fmt;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionPhase {
    Created,
    Negotiating,
    Bridged,
    Draining,
    Closed,
}

/// Inputs that drive [`SessionPhase`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseInput {
    /// The client connection was accepted
    Accepted,
    /// The backend accepted the configuration message
    StreamAccepted,
    /// Hangup, transport or stream failure, end-of-conversation, timeout or cancel
    Terminal,
    /// Teardown finished releasing every handle
    TeardownComplete,
}

impl SessionPhase {
    /// Phase reached from `self` on `input`, or `None` if the input is not
    /// allowed in this phase.
    pub fn next(self, input: PhaseInput) -> Option<SessionPhase> {
        use PhaseInput::*;
        use SessionPhase::*;

        match (self, input) {
            (Created, Accepted) => Some(Negotiating),
            (Negotiating, StreamAccepted) => Some(Bridged),
            (Bridged, StreamAccepted) => Some(Bridged),
            (Draining, StreamAccepted) => Some(Draining),
            (Created | Negotiating | Bridged | Draining, Terminal) => Some(Draining),
            (Draining | Closed, TeardownComplete) => Some(Closed),
            (Closed, _) => Some(Closed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self >= SessionPhase::Draining
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Negotiating => "negotiating",
            Self::Bridged => "bridged",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Client transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Negotiating,
    Connected,
    Closed,
}

/// Conversation stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unconfigured,
    Configured,
    Closed,
}

/// Snapshot of a session's state, published on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub transport: TransportState,
    pub stream: StreamState,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Created,
            transport: TransportState::Negotiating,
            stream: StreamState::Unconfigured,
        }
    }
}
