//! Codec for encoding and decoding Parley frames.
//!
//! Frames are MessagePack-encoded and written with a length prefix, so a
//! reader on a byte stream can always tell where one frame ends and the
//! next begins regardless of how the transport splits the bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Hard ceiling on frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default frame size limit for a [`FrameCodec`] (64 KiB).
pub const DEFAULT_FRAME_SIZE: usize = 64 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the size limit.
    #[error("Frame size {size} exceeds maximum {limit}")]
    FrameTooLarge {
        /// Declared or encoded payload size.
        size: usize,
        /// Limit in force.
        limit: usize,
    },

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl ProtocolError {
    /// Whether the stream can still be read after this error.
    ///
    /// A payload that fails to deserialize has already been consumed, so the
    /// next frame starts on a clean boundary. An oversized length prefix
    /// cannot be skipped safely.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::Decode(_) | ProtocolError::Incomplete(_))
    }
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_limited(frame, &mut buf, MAX_FRAME_SIZE)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    encode_limited(frame, buf, MAX_FRAME_SIZE)
}

fn encode_limited(frame: &Frame, buf: &mut BytesMut, limit: usize) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            limit,
        });
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = read_length(data);

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            limit: MAX_FRAME_SIZE,
        });
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    decode_from_limited(buf, MAX_FRAME_SIZE)
}

fn decode_from_limited(buf: &mut BytesMut, limit: usize) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = read_length(buf);

    if length > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            limit,
        });
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        buf.reserve(total_size - buf.len());
        return Ok(None);
    }

    // The payload leaves the buffer before deserializing, so a malformed
    // frame never blocks the frames behind it.
    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

fn read_length(data: &[u8]) -> usize {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize
}

/// Codec for streaming frame encoding/decoding with a per-connection size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_FRAME_SIZE)
    }

    /// Create a codec with a specific size limit, capped at [`MAX_FRAME_SIZE`].
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
        }
    }

    /// The size limit in force.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the frame exceeds the limit.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        encode_limited(frame, &mut buf, self.max_frame_size)?;
        Ok(buf.freeze())
    }

    /// Try to decode a frame from a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is invalid or exceeds the limit.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        decode_from_limited(buf, self.max_frame_size)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCode, Message};

    #[test]
    fn test_encode_decode_roundtrip() {
        let frames = vec![
            Frame::identify("alice"),
            Frame::welcome("alice"),
            Frame::error(ErrorCode::NameTaken, "username 'alice' is already in use"),
            Frame::message(Message::new("alice", "bob", "hello")),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = Frame::identify("alice");
        let encoded = encode(&frame).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_codec_limit() {
        let codec = FrameCodec::with_max_frame_size(32);
        let frame = Frame::message(Message::new("alice", "bob", "x".repeat(64)));

        match codec.encode(&frame) {
            Err(ProtocolError::FrameTooLarge { limit: 32, .. }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }

        let mut buf = BytesMut::from(&encode(&frame).unwrap()[..]);
        let err = codec.decode_from(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_codec_limit_is_capped() {
        let codec = FrameCodec::with_max_frame_size(usize::MAX);
        assert_eq!(codec.max_frame_size(), MAX_FRAME_SIZE);
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::identify("alice");
        let frame2 = Frame::message(Message::new("alice", "bob", "hello"));

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        let decoded1 = decode_from(&mut buf).unwrap().unwrap();
        let decoded2 = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(frame1, decoded1);
        assert_eq!(frame2, decoded2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_streaming_decode_split_across_reads() {
        let frame = Frame::message(Message::new("alice", "bob", "split me"));
        let encoded = encode(&frame).unwrap();

        let mut buf = BytesMut::new();
        for byte in &encoded[..encoded.len() - 1] {
            buf.put_u8(*byte);
            assert!(decode_from(&mut buf).unwrap().is_none());
        }
        buf.put_u8(encoded[encoded.len() - 1]);

        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let good = Frame::welcome("bob");

        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
        encode_into(&good, &mut buf).unwrap();

        let err = decode_from(&mut buf).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(decode_from(&mut buf).unwrap(), Some(good));
    }
}
