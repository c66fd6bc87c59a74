//! Bolt message classification and synthesized frames.
//!
//! Forwarded messages stay opaque: a [`BoltFrame`] carries the exact
//! on-wire bytes (chunk headers and terminator included) plus the tag
//! identified from the structure signature. The proxy only ever builds a
//! handful of messages itself (SUCCESS, FAILURE, GOODBYE) and those are
//! framed from scratch here.

use std::collections::HashMap;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::packstream::{PackStreamEncoder, PackStreamValue};

/// Bolt message tags understood by the proxy.
///
/// Unknown signatures are carried as [`BoltTag::Unknown`] and forwarded
/// untouched; frames too short to carry a signature are [`BoltTag::Nop`]
/// (keep-alive chunks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoltTag {
    /// HELLO (0x01)
    Hello,
    /// GOODBYE (0x02)
    Goodbye,
    /// RESET (0x0F)
    Reset,
    /// RUN (0x10)
    Run,
    /// BEGIN (0x11)
    Begin,
    /// COMMIT (0x12)
    Commit,
    /// ROLLBACK (0x13)
    Rollback,
    /// DISCARD (0x2F)
    Discard,
    /// PULL (0x3F)
    Pull,
    /// SUCCESS (0x70)
    Success,
    /// RECORD (0x71)
    Record,
    /// IGNORE (0x7E)
    Ignore,
    /// FAILURE (0x7F)
    Failure,
    /// Any other signature, forwarded as-is
    Unknown,
    /// Frame too short to carry a signature (keep-alive)
    Nop,
}

impl BoltTag {
    /// Map a signature byte to its tag.
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => BoltTag::Hello,
            0x02 => BoltTag::Goodbye,
            0x0F => BoltTag::Reset,
            0x10 => BoltTag::Run,
            0x11 => BoltTag::Begin,
            0x12 => BoltTag::Commit,
            0x13 => BoltTag::Rollback,
            0x2F => BoltTag::Discard,
            0x3F => BoltTag::Pull,
            0x70 => BoltTag::Success,
            0x71 => BoltTag::Record,
            0x7E => BoltTag::Ignore,
            0x7F => BoltTag::Failure,
            _ => BoltTag::Unknown,
        }
    }

    /// Identify the tag of a framed message.
    ///
    /// The signature byte sits at offset 3: two chunk-length bytes, the
    /// 0xB* structure marker, then the signature.
    pub fn identify(frame: &[u8]) -> Self {
        if frame.len() < 4 {
            return BoltTag::Nop;
        }
        Self::from_byte(frame[3])
    }

    /// Message name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            BoltTag::Hello => "HELLO",
            BoltTag::Goodbye => "GOODBYE",
            BoltTag::Reset => "RESET",
            BoltTag::Run => "RUN",
            BoltTag::Begin => "BEGIN",
            BoltTag::Commit => "COMMIT",
            BoltTag::Rollback => "ROLLBACK",
            BoltTag::Discard => "DISCARD",
            BoltTag::Pull => "PULL",
            BoltTag::Success => "SUCCESS",
            BoltTag::Record => "RECORD",
            BoltTag::Ignore => "IGNORE",
            BoltTag::Failure => "FAILURE",
            BoltTag::Unknown => "?UNKNOWN?",
            BoltTag::Nop => "NOP",
        }
    }
}

impl fmt::Display for BoltTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical Bolt message in its on-wire form.
///
/// `data` holds the complete framed bytes (chunk length prefixes, payload
/// and the terminating zero chunk) so a frame read from one peer can be
/// written to the other unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoltFrame {
    /// Message tag identified from the signature byte
    pub tag: BoltTag,
    /// Verbatim on-wire bytes
    pub data: Bytes,
}

impl BoltFrame {
    /// Wrap already-framed wire bytes, identifying the tag.
    pub fn from_wire(data: Bytes) -> Self {
        let tag = BoltTag::identify(&data);
        Self { tag, data }
    }

    /// Total size on the wire.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Frame a synthesized single-structure message.
///
/// Only used for messages the proxy builds itself; payloads are far below
/// the 65535-byte single-chunk limit.
pub fn frame_structure(signature: u8, fields: &[PackStreamValue]) -> BoltFrame {
    let mut enc = PackStreamEncoder::new();
    for field in fields {
        // Subset encoder cannot fail on the small maps/strings we build
        let _ = enc.encode(field);
    }
    let payload = enc.into_bytes();

    let mut data = BytesMut::with_capacity(payload.len() + 8);
    data.put_u16(payload.len() as u16 + 2);
    data.put_u8(0xB0 | fields.len() as u8);
    data.put_u8(signature);
    data.put_slice(&payload);
    data.put_u16(0);

    BoltFrame::from_wire(data.freeze())
}

/// Synthesize the SUCCESS answering a proxied HELLO.
///
/// Carries the proxy's identity and a per-session connection id, the two
/// fields drivers expect out of an authentication SUCCESS.
pub fn hello_success(server_agent: &str, connection_id: &str) -> BoltFrame {
    let mut meta = HashMap::new();
    meta.insert(
        "server".to_string(),
        PackStreamValue::String(server_agent.to_string()),
    );
    meta.insert(
        "connection_id".to_string(),
        PackStreamValue::String(connection_id.to_string()),
    );
    frame_structure(0x70, &[PackStreamValue::Map(meta)])
}

/// Synthesize an empty SUCCESS (`{}` metadata).
///
/// Sent for RESET outside a transaction without disturbing any backend.
pub fn empty_success() -> BoltFrame {
    BoltFrame::from_wire(Bytes::from_static(&[
        0x00, 0x03, 0xB1, 0x70, 0xA0, 0x00, 0x00,
    ]))
}

/// Synthesize a FAILURE with the given code and message.
pub fn failure(code: &str, message: &str) -> BoltFrame {
    let mut meta = HashMap::new();
    meta.insert("code".to_string(), PackStreamValue::String(code.to_string()));
    meta.insert(
        "message".to_string(),
        PackStreamValue::String(message.to_string()),
    );
    frame_structure(0x7F, &[PackStreamValue::Map(meta)])
}

/// Synthesize a GOODBYE, used to close backend links politely.
pub fn goodbye() -> BoltFrame {
    BoltFrame::from_wire(Bytes::from_static(&[0x00, 0x02, 0xB0, 0x02, 0x00, 0x00]))
}
