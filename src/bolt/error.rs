//! Bolt protocol error types.

use std::io;

use thiserror::Error;

use super::packstream::PackStreamError;

/// Result type for Bolt wire operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Bolt wire-level errors.
#[derive(Error, Debug)]
pub enum BoltError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Handshake error (bad magic, no version match, short handshake)
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// PackStream decode/encode error
    #[error("PackStream error: {0}")]
    PackStream(#[from] PackStreamError),

    /// Protocol error (broken framing, unexpected message)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Message exceeded the framing limit
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,
}

impl BoltError {
    /// Handshake error from any displayable cause.
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Protocol error from any displayable cause.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this error means the peer simply went away.
    ///
    /// Hangups end a session quietly; everything else is logged as a
    /// protocol failure.
    pub fn is_hangup(&self) -> bool {
        match self {
            BoltError::ConnectionClosed => true,
            BoltError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
