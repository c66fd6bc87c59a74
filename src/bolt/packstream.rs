//! PackStream subset for the proxy.
//!
//! The proxy only ever needs to read a handful of named fields out of
//! message metadata maps (`principal`, `mode`, `db`, `message`) and to
//! build small maps for the messages it synthesizes. This module carries
//! exactly that subset: maps with string keys, strings, integers, lists,
//! null and booleans. Anything else (floats, byte arrays, nested
//! structures) decodes to an error. Callers treat decode failures as
//! "no hint found" and fall back to defaults, never as a session failure.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Null marker
pub const NULL: u8 = 0xC0;
/// Boolean markers
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

/// Integer markers
pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

/// String markers. Tiny strings (0-15 bytes) use 0x80-0x8F.
pub const TINY_STRING_BASE: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;
pub const STRING_32: u8 = 0xD2;
pub const STRING_64: u8 = 0xD3;

/// List markers. Tiny lists (0-15 elements) use 0x90-0x9F.
pub const TINY_LIST_BASE: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;
pub const LIST_32: u8 = 0xD6;

/// Map markers. Tiny maps (0-15 entries) use 0xA0-0xAF.
pub const TINY_MAP_BASE: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;
pub const MAP_32: u8 = 0xDA;

/// Structure marker base (0xB0-0xBF, nibble holds the field count).
pub const TINY_STRUCT_BASE: u8 = 0xB0;

/// Errors produced by the subset decoder/encoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackStreamError {
    /// Ran out of bytes mid-value
    #[error("Unexpected end of input at position {0}")]
    UnexpectedEnd(usize),

    /// Marker outside the supported subset
    #[error("Unsupported marker 0x{0:02X} at position {1}")]
    UnsupportedMarker(u8, usize),

    /// Map key was not a string
    #[error("Map key is not a string at position {0}")]
    NonStringKey(usize),

    /// String bytes were not valid UTF-8
    #[error("Invalid UTF-8 in string at position {0}")]
    InvalidUtf8(usize),

    /// Value too large for the subset encoder
    #[error("Value too large to encode: {0} bytes")]
    TooLarge(usize),
}

/// A decoded PackStream value (proxy subset).
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamValue {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer (all widths collapse to i64)
    Integer(i64),
    /// String
    String(String),
    /// List
    List(Vec<PackStreamValue>),
    /// Map with string keys
    Map(HashMap<String, PackStreamValue>),
}

impl PackStreamValue {
    /// Borrow as a string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PackStreamValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read as an integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PackStreamValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Read as a boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PackStreamValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow as a list, if this is one.
    pub fn as_list(&self) -> Option<&[PackStreamValue]> {
        match self {
            PackStreamValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Borrow as a map, if this is one.
    pub fn as_map(&self) -> Option<&HashMap<String, PackStreamValue>> {
        match self {
            PackStreamValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// PackStream subset decoder reading from a byte slice.
pub struct PackStreamDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PackStreamDecoder<'a> {
    /// Create a decoder over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> Result<PackStreamValue, PackStreamError> {
        let at = self.pos;
        let marker = self.read_u8()?;

        // Tiny positive int (0x00-0x7F) and tiny negative int (0xF0-0xFF)
        if marker <= 0x7F {
            return Ok(PackStreamValue::Integer(marker as i64));
        }
        if marker >= 0xF0 {
            return Ok(PackStreamValue::Integer(marker as i8 as i64));
        }

        match marker >> 4 {
            0x8 => {
                let len = (marker & 0x0F) as usize;
                return self.read_string(len);
            }
            0x9 => {
                let len = (marker & 0x0F) as usize;
                return self.read_list(len);
            }
            0xA => {
                let len = (marker & 0x0F) as usize;
                return self.read_map(len);
            }
            _ => {}
        }

        match marker {
            NULL => Ok(PackStreamValue::Null),
            TRUE => Ok(PackStreamValue::Boolean(true)),
            FALSE => Ok(PackStreamValue::Boolean(false)),

            INT_8 => Ok(PackStreamValue::Integer(self.read_u8()? as i8 as i64)),
            INT_16 => Ok(PackStreamValue::Integer(self.read_be(2)? as i16 as i64)),
            INT_32 => Ok(PackStreamValue::Integer(self.read_be(4)? as i32 as i64)),
            INT_64 => Ok(PackStreamValue::Integer(self.read_be(8)? as i64)),

            STRING_8 => {
                let len = self.read_u8()? as usize;
                self.read_string(len)
            }
            STRING_16 => {
                let len = self.read_be(2)? as usize;
                self.read_string(len)
            }
            STRING_32 => {
                let len = self.read_be(4)? as usize;
                self.read_string(len)
            }
            STRING_64 => {
                let len = self.read_be(8)? as usize;
                self.read_string(len)
            }

            LIST_8 => {
                let len = self.read_u8()? as usize;
                self.read_list(len)
            }
            LIST_16 => {
                let len = self.read_be(2)? as usize;
                self.read_list(len)
            }
            LIST_32 => {
                let len = self.read_be(4)? as usize;
                self.read_list(len)
            }

            MAP_8 => {
                let len = self.read_u8()? as usize;
                self.read_map(len)
            }
            MAP_16 => {
                let len = self.read_be(2)? as usize;
                self.read_map(len)
            }
            MAP_32 => {
                let len = self.read_be(4)? as usize;
                self.read_map(len)
            }

            other => Err(PackStreamError::UnsupportedMarker(other, at)),
        }
    }

    fn read_u8(&mut self) -> Result<u8, PackStreamError> {
        if self.pos >= self.data.len() {
            return Err(PackStreamError::UnexpectedEnd(self.pos));
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Read `n` bytes as an unsigned big-endian integer.
    fn read_be(&mut self, n: usize) -> Result<u64, PackStreamError> {
        if self.pos + n > self.data.len() {
            return Err(PackStreamError::UnexpectedEnd(self.pos));
        }
        let mut value: u64 = 0;
        for &b in &self.data[self.pos..self.pos + n] {
            value = (value << 8) | b as u64;
        }
        self.pos += n;
        Ok(value)
    }

    fn read_string(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        if self.pos + len > self.data.len() {
            return Err(PackStreamError::UnexpectedEnd(self.pos));
        }
        let at = self.pos;
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        let s = std::str::from_utf8(bytes).map_err(|_| PackStreamError::InvalidUtf8(at))?;
        Ok(PackStreamValue::String(s.to_string()))
    }

    fn read_list(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        let mut items = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(PackStreamValue::List(items))
    }

    fn read_map(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        let mut map = HashMap::with_capacity(len.min(64));
        for _ in 0..len {
            let at = self.pos;
            let key = match self.decode()? {
                PackStreamValue::String(s) => s,
                _ => return Err(PackStreamError::NonStringKey(at)),
            };
            let value = self.decode()?;
            map.insert(key, value);
        }
        Ok(PackStreamValue::Map(map))
    }
}

/// Decode a single value from a byte slice.
pub fn decode(data: &[u8]) -> Result<PackStreamValue, PackStreamError> {
    PackStreamDecoder::new(data).decode()
}

/// Parse the leading metadata map of a framed message.
///
/// The map begins at offset 4 of the logical framed message: 2 bytes of
/// chunk length, the 0xB* structure marker, the signature byte, then the
/// first field. Messages whose first field is not a map (e.g. RUN, whose
/// first field is the query string) yield `None`, as does any decode
/// failure; a missing hint is never an error.
pub fn message_map(frame: &[u8]) -> Option<HashMap<String, PackStreamValue>> {
    if frame.len() <= 4 {
        return None;
    }
    match decode(&frame[4..]) {
        Ok(PackStreamValue::Map(m)) => Some(m),
        _ => None,
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// PackStream subset encoder writing into a [`BytesMut`].
pub struct PackStreamEncoder {
    buffer: BytesMut,
}

impl PackStreamEncoder {
    /// Create an encoder with a small default capacity.
    pub fn new() -> Self {
        Self { buffer: BytesMut::with_capacity(128) }
    }

    /// Consume the encoder and return the bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buffer
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &PackStreamValue) -> Result<(), PackStreamError> {
        match value {
            PackStreamValue::Null => {
                self.buffer.put_u8(NULL);
                Ok(())
            }
            PackStreamValue::Boolean(b) => {
                self.buffer.put_u8(if *b { TRUE } else { FALSE });
                Ok(())
            }
            PackStreamValue::Integer(i) => {
                self.encode_int(*i);
                Ok(())
            }
            PackStreamValue::String(s) => self.encode_string(s),
            PackStreamValue::List(items) => {
                self.encode_list_header(items.len())?;
                for item in items {
                    self.encode(item)?;
                }
                Ok(())
            }
            PackStreamValue::Map(map) => self.encode_map(map),
        }
    }

    /// Encode a string value.
    pub fn encode_string(&mut self, s: &str) -> Result<(), PackStreamError> {
        let len = s.len();
        match len {
            0..=15 => self.buffer.put_u8(TINY_STRING_BASE | len as u8),
            16..=255 => {
                self.buffer.put_u8(STRING_8);
                self.buffer.put_u8(len as u8);
            }
            256..=65535 => {
                self.buffer.put_u8(STRING_16);
                self.buffer.put_u16(len as u16);
            }
            _ => return Err(PackStreamError::TooLarge(len)),
        }
        self.buffer.put_slice(s.as_bytes());
        Ok(())
    }

    /// Encode an integer, picking the smallest representation.
    pub fn encode_int(&mut self, i: i64) {
        match i {
            -16..=127 => self.buffer.put_u8(i as u8),
            -128..=127 => {
                self.buffer.put_u8(INT_8);
                self.buffer.put_i8(i as i8);
            }
            -32768..=32767 => {
                self.buffer.put_u8(INT_16);
                self.buffer.put_i16(i as i16);
            }
            -2147483648..=2147483647 => {
                self.buffer.put_u8(INT_32);
                self.buffer.put_i32(i as i32);
            }
            _ => {
                self.buffer.put_u8(INT_64);
                self.buffer.put_i64(i);
            }
        }
    }

    /// Encode a map with string keys.
    pub fn encode_map(
        &mut self,
        map: &HashMap<String, PackStreamValue>,
    ) -> Result<(), PackStreamError> {
        let len = map.len();
        match len {
            0..=15 => self.buffer.put_u8(TINY_MAP_BASE | len as u8),
            16..=255 => {
                self.buffer.put_u8(MAP_8);
                self.buffer.put_u8(len as u8);
            }
            _ => return Err(PackStreamError::TooLarge(len)),
        }
        // Deterministic key order keeps synthesized frames reproducible
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            self.encode_string(key)?;
            self.encode(&map[key])?;
        }
        Ok(())
    }

    fn encode_list_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        match len {
            0..=15 => self.buffer.put_u8(TINY_LIST_BASE | len as u8),
            16..=255 => {
                self.buffer.put_u8(LIST_8);
                self.buffer.put_u8(len as u8);
            }
            _ => return Err(PackStreamError::TooLarge(len)),
        }
        Ok(())
    }
}

impl Default for PackStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: PackStreamValue) {
        let mut enc = PackStreamEncoder::new();
        enc.encode(&value).unwrap();
        let bytes = enc.into_bytes();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_decode_tiny_int() {
        assert_eq!(decode(&[0x00]).unwrap(), PackStreamValue::Integer(0));
        assert_eq!(decode(&[0x7F]).unwrap(), PackStreamValue::Integer(127));
        assert_eq!(decode(&[0xF0]).unwrap(), PackStreamValue::Integer(-16));
        assert_eq!(decode(&[0xFF]).unwrap(), PackStreamValue::Integer(-1));
    }

    #[test]
    fn test_decode_sized_ints() {
        assert_eq!(decode(&[0xC8, 0x80]).unwrap(), PackStreamValue::Integer(-128));
        assert_eq!(
            decode(&[0xC9, 0x01, 0x00]).unwrap(),
            PackStreamValue::Integer(256)
        );
        assert_eq!(
            decode(&[0xCA, 0x00, 0x01, 0x00, 0x00]).unwrap(),
            PackStreamValue::Integer(65536)
        );
        assert_eq!(
            decode(&[0xCB, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]).unwrap(),
            PackStreamValue::Integer(1 << 32)
        );
    }

    #[test]
    fn test_decode_tiny_string() {
        assert_eq!(
            decode(&[0x82, b'd', b'b']).unwrap(),
            PackStreamValue::String("db".to_string())
        );
        assert_eq!(decode(&[0x80]).unwrap(), PackStreamValue::String(String::new()));
    }

    #[test]
    fn test_decode_sized_string() {
        let mut data = vec![0xD0, 20];
        data.extend_from_slice(b"abcdefghijklmnopqrst");
        assert_eq!(
            decode(&data).unwrap(),
            PackStreamValue::String("abcdefghijklmnopqrst".to_string())
        );
    }

    #[test]
    fn test_decode_null_and_bools() {
        assert_eq!(decode(&[0xC0]).unwrap(), PackStreamValue::Null);
        assert_eq!(decode(&[0xC2]).unwrap(), PackStreamValue::Boolean(false));
        assert_eq!(decode(&[0xC3]).unwrap(), PackStreamValue::Boolean(true));
    }

    #[test]
    fn test_decode_tiny_map() {
        // {"mode": "r"}
        let data = [0xA1, 0x84, b'm', b'o', b'd', b'e', 0x81, b'r'];
        let value = decode(&data).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("mode").unwrap().as_str(), Some("r"));
    }

    #[test]
    fn test_decode_nested() {
        // {"servers": ["a:7687", "b:7687"], "ttl": 300}
        let mut data = vec![0xA2];
        data.push(0x87);
        data.extend_from_slice(b"servers");
        data.push(0x92);
        data.push(0x86);
        data.extend_from_slice(b"a:7687");
        data.push(0x86);
        data.extend_from_slice(b"b:7687");
        data.push(0x83);
        data.extend_from_slice(b"ttl");
        data.extend_from_slice(&[0xC9, 0x01, 0x2C]);

        let value = decode(&data).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("ttl").unwrap().as_int(), Some(300));
        let servers = map.get("servers").unwrap().as_list().unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].as_str(), Some("a:7687"));
    }

    #[test]
    fn test_unsupported_marker_errors() {
        // Float (0xC1) is outside the subset
        let err = decode(&[0xC1, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, PackStreamError::UnsupportedMarker(0xC1, 0)));
    }

    #[test]
    fn test_truncated_input_errors() {
        let err = decode(&[0x85, b'a', b'b']).unwrap_err();
        assert!(matches!(err, PackStreamError::UnexpectedEnd(_)));
    }

    #[test]
    fn test_message_map_begin() {
        // Framed BEGIN with {"mode": "r"}: len, 0xB1, 0x11, map, terminator
        let data = [
            0x00, 0x0A, 0xB1, 0x11, 0xA1, 0x84, b'm', b'o', b'd', b'e', 0x81, b'r', 0x00, 0x00,
        ];
        let map = message_map(&data).unwrap();
        assert_eq!(map.get("mode").unwrap().as_str(), Some("r"));
    }

    #[test]
    fn test_message_map_non_map_payload_is_none() {
        // RUN's first field is the query string, not a map
        let data = [0x00, 0x06, 0xB3, 0x10, 0x83, b'R', b'U', b'N', 0x00, 0x00];
        assert!(message_map(&data).is_none());
    }

    #[test]
    fn test_message_map_short_frame_is_none() {
        assert!(message_map(&[0x00, 0x00]).is_none());
    }

    #[test]
    fn test_encode_round_trips() {
        round_trip(PackStreamValue::Null);
        round_trip(PackStreamValue::Boolean(true));
        round_trip(PackStreamValue::Integer(42));
        round_trip(PackStreamValue::Integer(-42));
        round_trip(PackStreamValue::Integer(70000));
        round_trip(PackStreamValue::String("hello".to_string()));
        round_trip(PackStreamValue::String("x".repeat(300)));
        round_trip(PackStreamValue::List(vec![
            PackStreamValue::Integer(1),
            PackStreamValue::String("two".to_string()),
            PackStreamValue::Null,
        ]));

        let mut map = HashMap::new();
        map.insert("db".to_string(), PackStreamValue::String("sales".to_string()));
        map.insert("mode".to_string(), PackStreamValue::String("r".to_string()));
        round_trip(PackStreamValue::Map(map));
    }

    #[test]
    fn test_encoder_deterministic_map_order() {
        let mut map = HashMap::new();
        map.insert("b".to_string(), PackStreamValue::Integer(2));
        map.insert("a".to_string(), PackStreamValue::Integer(1));

        let mut enc1 = PackStreamEncoder::new();
        enc1.encode_map(&map).unwrap();
        let mut enc2 = PackStreamEncoder::new();
        enc2.encode_map(&map).unwrap();
        assert_eq!(enc1.into_bytes(), enc2.into_bytes());
    }
}
