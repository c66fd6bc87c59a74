//! Bolt handshake negotiation for the proxy.
//!
//! The proxy sits between two handshakes. On the backend side it proposes
//! versions like any client; on the client side it answers proposals like a
//! server, but instead of owning a support list it mirrors the single
//! version the backend already agreed to. A client proposal is accepted iff
//! it covers that backend version (exactly, or through its minor range).

use super::version::{parse_proposals, BoltVersion};
use super::{BoltError, BOLT_MAGIC, PROPOSALS_SIZE};

/// Check the four magic bytes opening every Bolt connection.
pub fn validate_magic(magic: &[u8]) -> Result<(), BoltError> {
    if magic.len() < 4 {
        return Err(BoltError::handshake("magic too short"));
    }
    if magic[..4] != BOLT_MAGIC {
        return Err(BoltError::handshake(format!(
            "invalid magic bytes: {:02X?}",
            &magic[..4]
        )));
    }
    Ok(())
}

/// Negotiate the version answered to a client.
///
/// `proposals` is the 16-byte block following the client's magic. Returns
/// the 4 bytes to write back (always the backend's own version) or a
/// handshake error when no proposal covers it.
pub fn negotiate(proposals: &[u8], backend: BoltVersion) -> Result<[u8; 4], BoltError> {
    if proposals.len() < PROPOSALS_SIZE {
        return Err(BoltError::handshake(format!(
            "client proposal block wrong size: {} bytes",
            proposals.len()
        )));
    }

    for proposal in parse_proposals(&proposals[..PROPOSALS_SIZE]) {
        if proposal.covers(backend) {
            return Ok(backend.to_wire());
        }
    }

    Err(BoltError::handshake(format!(
        "no client proposal matches backend version {}",
        backend
    )))
}

/// Build the 20-byte handshake the proxy sends to a backend it is
/// authenticating against: magic, the already-negotiated version, and
/// three empty proposal slots.
pub fn backend_handshake(version: BoltVersion) -> [u8; 20] {
    let mut data = [0u8; 20];
    data[0..4].copy_from_slice(&BOLT_MAGIC);
    data[4..8].copy_from_slice(&version.to_wire());
    data
}
