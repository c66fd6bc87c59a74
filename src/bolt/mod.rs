//! # Bolt Protocol Layer
//!
//! Low-level Bolt wire protocol support for the proxy: framing, message
//! classification, handshake negotiation, and the PackStream subset needed
//! to peek at routing hints inside forwarded messages.
//!
//! ## Overview
//!
//! The Bolt protocol is a binary, chunked, versioned protocol. The proxy
//! never interprets full message payloads; forwarded messages keep their
//! on-wire bytes untouched. This module provides:
//!
//! - **Codec** - chunked message framing for Tokio (frames kept verbatim)
//! - **Message** - tag classification and synthesized responses
//! - **Handshake** - version negotiation between client proposals and the
//!   backend's advertised version
//! - **PackStream** - partial decoder/encoder for routing hints and
//!   synthesized metadata maps
//!
//! ## Note
//!
//! Everything above the wire level (routing, pooling, sessions) lives in
//! [`crate::proxy`].

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;
pub mod version;

pub use codec::BoltFrameCodec;
pub use error::{BoltError, BoltResult};
pub use message::{BoltFrame, BoltTag};
pub use packstream::{PackStreamError, PackStreamValue};
pub use version::BoltVersion;

/// Bolt protocol magic number: 0x6060B017.
/// This identifies a Bolt connection.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the complete handshake message from a client (magic + 4 versions).
pub const HANDSHAKE_SIZE: usize = 20;

/// Size of the version proposal block (4 x 4-byte proposals).
pub const PROPOSALS_SIZE: usize = 16;

/// Size of the server handshake response (negotiated version).
pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_constant() {
        // Verify magic number matches the Bolt spec
        assert_eq!(BOLT_MAGIC, [0x60, 0x60, 0xB0, 0x17]);
    }

    #[test]
    fn test_handshake_sizes() {
        assert_eq!(HANDSHAKE_SIZE, 20);
        assert_eq!(PROPOSALS_SIZE, 16);
        assert_eq!(HANDSHAKE_RESPONSE_SIZE, 4);
    }
}
