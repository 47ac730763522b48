//! AudioSocket telephony wire protocol.
//!
//! Asterisk's AudioSocket application streams signed linear 16-bit, 8 kHz,
//! mono audio over a plain TCP connection using small typed frames. The first
//! frame of every call announces the call id as a raw 16-byte UUID.

mod codec;

pub use codec::{
    Frame, FrameType, HEADER_LEN, MAX_PAYLOAD_LEN, ProtocolError, ProtocolResult,
    check_declared_len, read_frame, write_frame,
};

use uuid::Uuid;

/// Native sample rate of the AudioSocket media stream.
pub const SAMPLE_RATE: u32 = 8000;

/// Bytes per 20 ms audio frame (160 samples of 16-bit audio).
pub const FRAME_BYTES: usize = 320;

/// Playback duration of one [`FRAME_BYTES`] frame.
pub const FRAME_DURATION_MS: u64 = 20;

/// Renders a uuid-announce payload as a hyphenated call id.
pub fn parse_call_id(payload: &[u8]) -> ProtocolResult<String> {
    let uuid = Uuid::from_slice(payload).map_err(|_| ProtocolError::InvalidCallId(payload.len()))?;
    Ok(uuid.hyphenated().to_string())
}
