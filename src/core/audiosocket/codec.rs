//! AudioSocket frame codec.
//!
//! Every frame is `type (1 byte) | length (u16, big-endian) | payload`. The codec
//! keeps no state between calls; callers own buffering and flushing.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Size of the fixed frame header (type byte + length).
pub const HEADER_LEN: usize = 3;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while decoding or encoding frames.
///
/// None of these are recoverable: once a read fails the byte stream can no
/// longer be trusted to be aligned on a frame boundary.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream ended in the middle of a frame
    #[error("Frame truncated: stream closed after {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },

    /// The decoded length does not fit the 16-bit length field
    #[error("Frame too large: declared length {len} exceeds {MAX_PAYLOAD_LEN}")]
    FrameTooLarge { len: usize },

    /// A payload handed to the writer does not fit the 16-bit length field
    #[error("Payload too large: {len} bytes exceeds {MAX_PAYLOAD_LEN}")]
    PayloadTooLarge { len: usize },

    /// The type byte is not one of the known frame kinds
    #[error("Unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),

    /// The uuid-announce payload is not a 16-byte UUID
    #[error("Invalid call id payload: expected 16 bytes, got {0}")]
    InvalidCallId(usize),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// =============================================================================
// Frame Types
// =============================================================================

/// Kind of an AudioSocket frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Remote side hung up
    Hangup = 0x00,
    /// Call identifier announcement (16-byte UUID payload)
    Uuid = 0x01,
    /// Silence indicator, no payload
    Silence = 0x02,
    /// Signed linear 16-bit, 8 kHz, mono audio
    Audio = 0x10,
    /// Error reported by the remote side
    Error = 0xFF,
}

impl FrameType {
    /// Wire byte for this frame type.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Hangup),
            0x01 => Ok(Self::Uuid),
            0x02 => Ok(Self::Silence),
            0x10 => Ok(Self::Audio),
            0xFF => Ok(Self::Error),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hangup => "hangup",
            Self::Uuid => "uuid",
            Self::Silence => "silence",
            Self::Audio => "audio",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Empty hangup frame.
    pub fn hangup() -> Self {
        Self::new(FrameType::Hangup, Bytes::new())
    }

    /// Audio frame carrying `samples`.
    pub fn audio(samples: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Audio, samples)
    }
}

// =============================================================================
// Read / Write
// =============================================================================

/// Rejects lengths the 16-bit field cannot represent.
///
/// The wire field is a `u16`, but the length may have passed through a wider
/// type before reaching here.
#[inline]
pub fn check_declared_len(len: usize) -> ProtocolResult<usize> {
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::FrameTooLarge { len });
    }
    Ok(len)
}

/// Reads one frame from `source`.
///
/// Returns `Ok(None)` when the stream ends cleanly before a new frame starts.
pub async fn read_frame<R>(source: &mut R) -> ProtocolResult<Option<Frame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut type_byte = [0u8; 1];
    if source.read(&mut type_byte).await? == 0 {
        return Ok(None);
    }

    let mut len_bytes = [0u8; 2];
    read_exact_or_truncated(source, &mut len_bytes, 1, HEADER_LEN).await?;
    let len = check_declared_len(usize::from(u16::from_be_bytes(len_bytes)))?;

    // Validate the type only after the header is complete so a bad type byte
    // is never confused with a short read.
    let frame_type = FrameType::try_from(type_byte[0])?;

    let mut payload = vec![0u8; len];
    read_exact_or_truncated(source, &mut payload, HEADER_LEN, HEADER_LEN + len).await?;

    Ok(Some(Frame::new(frame_type, payload)))
}

/// Writes one frame to `sink` as two writes: the header, then the payload.
pub async fn write_frame<W>(sink: &mut W, frame_type: FrameType, payload: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge { len: payload.len() });
    }

    let len = payload.len() as u16;
    let [hi, lo] = len.to_be_bytes();
    sink.write_all(&[frame_type.as_u8(), hi, lo]).await?;
    if !payload.is_empty() {
        sink.write_all(payload).await?;
    }
    Ok(())
}

async fn read_exact_or_truncated<R>(
    source: &mut R,
    buf: &mut [u8],
    already_read: usize,
    expected: usize,
) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                read: already_read + filled,
                expected,
            });
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn encode(frame_type: FrameType, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, frame_type, payload).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_round_trip_every_frame_type() {
        let cases: [(FrameType, &[u8]); 5] = [
            (FrameType::Hangup, &[]),
            (FrameType::Uuid, &[7u8; 16]),
            (FrameType::Silence, &[]),
            (FrameType::Audio, &[1, 2, 3, 4]),
            (FrameType::Error, &[0x01]),
        ];

        for (frame_type, payload) in cases {
            let bytes = encode(frame_type, payload).await;
            let mut cursor = Cursor::new(bytes);
            let frame = read_frame(&mut cursor).await.unwrap().unwrap();
            assert_eq!(frame.frame_type, frame_type);
            assert_eq!(frame.payload.as_ref(), payload);
        }
    }

    #[tokio::test]
    async fn test_max_payload_round_trip() {
        let payload = vec![0xAB; MAX_PAYLOAD_LEN];
        let bytes = encode(FrameType::Audio, &payload).await;
        assert_eq!(&bytes[..3], &[0x10, 0xFF, 0xFF]);

        let frame = read_frame(&mut Cursor::new(bytes)).await.unwrap().unwrap();
        assert_eq!(frame.payload.len(), MAX_PAYLOAD_LEN);
    }

    #[tokio::test]
    async fn test_zero_length_hangup_encoding() {
        let bytes = encode(FrameType::Hangup, &[]).await;
        assert_eq!(bytes, vec![0x00, 0x00, 0x00]);

        let frame = read_frame(&mut Cursor::new(bytes)).await.unwrap().unwrap();
        assert_eq!(frame, Frame::hangup());
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        let mut out = Vec::new();
        let err = write_frame(&mut out, FrameType::Audio, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { len } if len == 65536));
        assert!(out.is_empty());
    }

    #[test]
    fn test_frame_type_from_wire_byte() {
        assert_eq!(FrameType::try_from(0x00).unwrap(), FrameType::Hangup);
        assert_eq!(FrameType::try_from(0x10).unwrap(), FrameType::Audio);
        // The error frame kind is a frame type, not a conversion failure.
        assert_eq!(FrameType::try_from(0xFF).unwrap(), FrameType::Error);
        assert_eq!(FrameType::Error.as_u8(), 0xFF);
        assert!(matches!(
            FrameType::try_from(0x03),
            Err(ProtocolError::UnknownFrameType(0x03))
        ));
    }

    #[test]
    fn test_declared_length_bound() {
        assert_eq!(check_declared_len(MAX_PAYLOAD_LEN).unwrap(), MAX_PAYLOAD_LEN);
        let err = check_declared_len(MAX_PAYLOAD_LEN + 1).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { len } if len == 65536));
    }

    #[tokio::test]
    async fn test_header_and_payload_written_separately() {
        let mut sink = tokio_test::io::Builder::new()
            .write(&[0x10, 0x00, 0x04])
            .write(&[9, 8, 7, 6])
            .build();
        write_frame(&mut sink, FrameType::Audio, &[9, 8, 7, 6])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let mut cursor = Cursor::new(vec![0x10, 0x00]);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { read: 2, expected: 3 }));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let mut cursor = Cursor::new(vec![0x10, 0x00, 0x05, 1, 2]);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { read: 5, expected: 8 }));
    }

    #[tokio::test]
    async fn test_unknown_frame_type() {
        let mut cursor = Cursor::new(vec![0x42, 0x00, 0x00]);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownFrameType(0x42)));
    }

    #[tokio::test]
    async fn test_consecutive_frames_share_stream() {
        let mut bytes = encode(FrameType::Audio, &[1, 2]).await;
        bytes.extend(encode(FrameType::Hangup, &[]).await);
        let mut cursor = Cursor::new(bytes);

        let first = read_frame(&mut cursor).await.unwrap().unwrap();
        let second = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(first.frame_type, FrameType::Audio);
        assert_eq!(second.frame_type, FrameType::Hangup);
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }
}
