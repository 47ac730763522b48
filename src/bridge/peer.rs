//! Peer-connection abstraction for browser sessions.
//!
//! The bridge only drives the signaling state machine: it hands offers,
//! answers and candidates to a [`PeerConnection`] and asks whether media can
//! flow. ICE and DTLS live behind this trait.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::signaling::IceCandidate;
use crate::core::conversation::{AudioEncoding, StreamFormat};

/// Errors raised by a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    /// Operation not valid in the current signaling state
    #[error("Invalid signaling state: {0}")]
    InvalidState(String),

    #[error("Peer connection closed")]
    Closed,
}

/// Result type for peer-connection operations.
pub type PeerResult<T> = Result<T, PeerError>;

/// One side of a browser media session.
#[async_trait]
pub trait PeerConnection: Send {
    /// Applies a remote offer and returns the local answer.
    async fn accept_offer(&mut self, sdp: &str) -> PeerResult<String>;

    /// Applies a remote answer to a locally generated offer.
    async fn apply_answer(&mut self, sdp: &str) -> PeerResult<()>;

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> PeerResult<()>;

    /// Whether the media path is established.
    fn is_media_ready(&self) -> bool;

    async fn close(&mut self);
}

/// Creates one [`PeerConnection`] per session.
pub trait PeerFactory: Send + Sync {
    fn create(&self, session_id: &str) -> PeerResult<Box<dyn PeerConnection>>;
}

/// Peer whose media track rides the signaling socket itself.
///
/// Binary frames on the signaling WebSocket carry raw PCM in the configured
/// format, so negotiation reduces to answering the client's offer with a
/// matching description.
pub struct SocketMediaPeer {
    session_id: String,
    format: StreamFormat,
    answered: bool,
    closed: bool,
    remote_candidates: Vec<IceCandidate>,
}

impl SocketMediaPeer {
    pub fn new(session_id: impl Into<String>, format: StreamFormat) -> Self {
        Self {
            session_id: session_id.into(),
            format,
            answered: false,
            closed: false,
            remote_candidates: Vec::new(),
        }
    }

    pub fn remote_candidates(&self) -> &[IceCandidate] {
        &self.remote_candidates
    }

    fn answer_for(&self, offer: &str) -> String {
        let mid = offer
            .lines()
            .find_map(|line| line.trim().strip_prefix("a=mid:"))
            .unwrap_or("0");
        let codec = match self.format.encoding {
            AudioEncoding::Linear16 => "L16",
            AudioEncoding::Mulaw => "PCMU",
            AudioEncoding::Alaw => "PCMA",
        };
        let session = self.session_id.replace('-', "");
        let session = session.get(..12).unwrap_or(&session);

        format!(
            "v=0\r\n\
             o=- {session} 1 IN IP4 0.0.0.0\r\n\
             s=voice-bridge\r\n\
             t=0 0\r\n\
             m=audio 9 TCP/WS 96\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:96 {codec}/{rate}/{channels}\r\n\
             a=mid:{mid}\r\n\
             a=sendrecv\r\n",
            rate = self.format.sample_rate,
            channels = self.format.channels,
        )
    }
}

#[async_trait]
impl PeerConnection for SocketMediaPeer {
    async fn accept_offer(&mut self, sdp: &str) -> PeerResult<String> {
        if self.closed {
            return Err(PeerError::Closed);
        }
        if !sdp.trim_start().starts_with("v=") {
            return Err(PeerError::InvalidDescription(
                "offer does not start with a version line".to_string(),
            ));
        }
        if !sdp.contains("m=audio") {
            return Err(PeerError::InvalidDescription(
                "offer has no audio section".to_string(),
            ));
        }
        let answer = self.answer_for(sdp);
        self.answered = true;
        debug!(session_id = %self.session_id, "Answered client offer");
        Ok(answer)
    }

    async fn apply_answer(&mut self, _sdp: &str) -> PeerResult<()> {
        // This peer never offers, so there is nothing an answer could complete.
        Err(PeerError::InvalidState(
            "no local offer outstanding".to_string(),
        ))
    }

    async fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> PeerResult<()> {
        if self.closed {
            return Err(PeerError::Closed);
        }
        if candidate.candidate.trim().is_empty() {
            return Err(PeerError::InvalidCandidate("empty candidate".to_string()));
        }
        self.remote_candidates.push(candidate.clone());
        Ok(())
    }

    fn is_media_ready(&self) -> bool {
        self.answered && !self.closed
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// Factory for [`SocketMediaPeer`]s.
pub struct SocketMediaPeerFactory {
    format: StreamFormat,
}

impl SocketMediaPeerFactory {
    pub fn new(format: StreamFormat) -> Self {
        Self { format }
    }
}

impl PeerFactory for SocketMediaPeerFactory {
    fn create(&self, session_id: &str) -> PeerResult<Box<dyn PeerConnection>> {
        Ok(Box::new(SocketMediaPeer::new(session_id, self.format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:audio0\r\n";

    #[tokio::test]
    async fn test_answer_mirrors_mid_and_format() {
        let mut peer = SocketMediaPeer::new("0f0e-0d0c", StreamFormat::linear16(16000));
        assert!(!peer.is_media_ready());

        let answer = peer.accept_offer(OFFER).await.unwrap();
        assert!(answer.starts_with("v=0\r\n"));
        assert!(answer.contains("a=mid:audio0"));
        assert!(answer.contains("a=rtpmap:96 L16/16000/1"));
        assert!(peer.is_media_ready());
    }

    #[tokio::test]
    async fn test_rejects_offer_without_audio() {
        let mut peer = SocketMediaPeer::new("s", StreamFormat::linear16(16000));
        let err = peer.accept_offer("v=0\r\nm=video 9 RTP 96\r\n").await.unwrap_err();
        assert!(matches!(err, PeerError::InvalidDescription(_)));
        assert!(!peer.is_media_ready());
    }

    #[tokio::test]
    async fn test_candidates_are_recorded() {
        let mut peer = SocketMediaPeer::new("s", StreamFormat::linear16(16000));
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        peer.add_ice_candidate(&candidate).await.unwrap();
        assert_eq!(peer.remote_candidates(), &[candidate]);

        let empty = IceCandidate {
            candidate: " ".to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        };
        assert!(peer.add_ice_candidate(&empty).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_peer_is_not_ready() {
        let mut peer = SocketMediaPeer::new("s", StreamFormat::linear16(16000));
        peer.accept_offer(OFFER).await.unwrap();
        peer.close().await;
        assert!(!peer.is_media_ready());
        assert!(matches!(peer.accept_offer(OFFER).await, Err(PeerError::Closed)));
    }
}
