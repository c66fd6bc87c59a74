//! Bolt frame codec for tokio_util.
//!
//! Implements chunked message framing as per the Bolt protocol: a logical
//! message is a run of (2-byte big-endian length, payload) chunks closed by
//! a zero-length chunk. Unlike a driver codec this one never strips the
//! framing: the decoder yields the complete wire bytes so the proxy can
//! forward every message byte-identically, and the encoder writes frames
//! back out verbatim.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::BoltFrame;
use super::BoltError;

/// Maximum chunk payload size (2-byte unsigned length).
pub const MAX_CHUNK_SIZE: usize = 65535;

/// End of message marker (0x00 0x00).
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

/// Default cap on a single logical message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Verbatim Bolt frame codec.
#[derive(Debug)]
pub struct BoltFrameCodec {
    /// Maximum logical message size
    max_message_size: usize,
}

impl BoltFrameCodec {
    /// Create a codec with the default message size limit.
    pub fn new() -> Self {
        Self { max_message_size: DEFAULT_MAX_MESSAGE_SIZE }
    }

    /// Create a codec with a custom message size limit.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for BoltFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BoltFrameCodec {
    type Item = BoltFrame;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Walk the chunk headers without consuming until a whole logical
        // message (terminator included) is buffered.
        let mut pos = 0;
        loop {
            if src.len() < pos + 2 {
                return Ok(None);
            }
            let chunk_size = u16::from_be_bytes([src[pos], src[pos + 1]]) as usize;
            pos += 2;

            if chunk_size == 0 {
                // Terminator. A bare terminator (2 bytes) is a NOOP
                // keep-alive and is forwarded like anything else.
                let frame = BoltFrame::from_wire(src.split_to(pos).freeze());
                return Ok(Some(frame));
            }

            if pos + chunk_size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: pos + chunk_size,
                    max: self.max_message_size,
                });
            }

            if src.len() < pos + chunk_size {
                return Ok(None);
            }
            pos += chunk_size;
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // EOF in the middle of a chunk or its length prefix
            None => Err(BoltError::protocol("connection closed mid-message")),
        }
    }
}

impl Encoder<BoltFrame> for BoltFrameCodec {
    type Error = BoltError;

    fn encode(&mut self, item: BoltFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(&item.data);
        Ok(())
    }
}

/// Split a buffer holding one or more complete framed messages.
///
/// WebSocket transports deliver whole frames that may pack several Bolt
/// messages (RUN followed by PULL has been observed in a single frame);
/// this recovers them in FIFO order. Trailing partial data is a protocol
/// error because ws frames are never split mid-message.
pub fn split_frames(payload: &[u8]) -> Result<Vec<BoltFrame>, BoltError> {
    let mut codec = BoltFrameCodec::new();
    let mut buf = BytesMut::from(payload);
    let mut frames = Vec::new();

    while let Some(frame) = codec.decode(&mut buf)? {
        frames.push(frame);
    }
    if buf.has_remaining() {
        return Err(BoltError::protocol(format!(
            "{} trailing bytes after framed messages",
            buf.remaining()
        )));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::BoltTag;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        data.extend_from_slice(payload);
        data.extend_from_slice(&END_MARKER);
        data
    }

    #[test]
    fn test_decode_single_chunk() {
        let mut codec = BoltFrameCodec::new();
        let wire = framed(&[0xB1, 0x70, 0xA0]);
        let mut buf = BytesMut::from(&wire[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.tag, BoltTag::Success);
        assert_eq!(&frame.data[..], &wire[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_keeps_framing_verbatim() {
        let mut codec = BoltFrameCodec::new();
        // Two chunks: [0xB1, 0x10] + [0x85, b'h', b'e', b'l', b'l'] then terminator
        let wire = [
            0x00, 0x02, 0xB1, 0x10, 0x00, 0x05, 0x85, b'h', b'e', b'l', b'l', 0x00, 0x00,
        ];
        let mut buf = BytesMut::from(&wire[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.tag, BoltTag::Run);
        // The multi-chunk message comes back as one frame, bytes untouched
        assert_eq!(&frame.data[..], &wire[..]);
    }

    #[test]
    fn test_decode_partial_returns_none() {
        let mut codec = BoltFrameCodec::new();
        let wire = framed(&[0xB1, 0x70, 0xA0]);

        // Header only
        let mut buf = BytesMut::from(&wire[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Missing the terminator
        let mut buf = BytesMut::from(&wire[..wire.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Complete
        let mut buf = BytesMut::from(&wire[..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_two_messages_one_read() {
        let mut codec = BoltFrameCodec::new();
        let mut wire = framed(&[0xB1, 0x11, 0xA0]);
        wire.extend_from_slice(&framed(&[0xB1, 0x10, 0x80]));
        let mut buf = BytesMut::from(&wire[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.tag, BoltTag::Begin);
        assert_eq!(second.tag, BoltTag::Run);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_max_single_chunk() {
        let mut codec = BoltFrameCodec::new();
        let mut payload = vec![0xB1, 0x71];
        payload.resize(MAX_CHUNK_SIZE, 0xAB);
        let wire = framed(&payload);
        let mut buf = BytesMut::from(&wire[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.tag, BoltTag::Record);
        assert_eq!(frame.len(), MAX_CHUNK_SIZE + 4);
    }

    #[test]
    fn test_decode_noop_keepalive() {
        let mut codec = BoltFrameCodec::new();
        let mut buf = BytesMut::from(&END_MARKER[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.tag, BoltTag::Nop);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_decode_message_too_large() {
        let mut codec = BoltFrameCodec::with_max_size(64);
        let wire = framed(&vec![0u8; 128]);
        let mut buf = BytesMut::from(&wire[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, BoltError::MessageTooLarge { .. }));
    }

    #[test]
    fn test_decode_eof_mid_message_is_error() {
        let mut codec = BoltFrameCodec::new();
        let wire = framed(&[0xB1, 0x70, 0xA0]);
        let mut buf = BytesMut::from(&wire[..3]);

        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[test]
    fn test_encode_verbatim() {
        let mut codec = BoltFrameCodec::new();
        let wire = framed(&[0xB1, 0x70, 0xA0]);
        let frame = BoltFrame::from_wire(bytes::Bytes::from(wire.clone()));

        let mut out = BytesMut::new();
        codec.encode(frame, &mut out).unwrap();
        assert_eq!(&out[..], &wire[..]);
    }

    #[test]
    fn test_split_frames_multiple() {
        let mut wire = framed(&[0xB1, 0x10, 0x80]);
        wire.extend_from_slice(&framed(&[0xB1, 0x3F, 0xA0]));

        let frames = split_frames(&wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].tag, BoltTag::Run);
        assert_eq!(frames[1].tag, BoltTag::Pull);
    }

    #[test]
    fn test_split_frames_trailing_garbage() {
        let mut wire = framed(&[0xB1, 0x10, 0x80]);
        wire.push(0x00); // half a length prefix

        let err = split_frames(&wire).unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }
}
