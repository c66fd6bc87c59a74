//! Bolt protocol version definitions.
//!
//! Versions travel as 4-byte big-endian words. The server response and a
//! plain proposal look like `[0, 0, minor, major]`; client proposals may
//! additionally carry a range byte (`[0, range, minor, major]`) meaning
//! "this minor and up to `range` minors below it". The proxy parses ranges
//! out of proposals but never produces them; it simply mirrors whatever
//! the backend advertised.

use std::fmt;

/// A Bolt protocol version.
///
/// Semantic equality is on (major, minor) only; the proxy does not track
/// patch levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoltVersion {
    /// Major version number
    pub major: u8,
    /// Minor version number
    pub minor: u8,
}

impl BoltVersion {
    /// Create a version from its parts.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parse the 4-byte wire form `[0, 0, minor, major]`.
    ///
    /// Returns `None` for the all-zero word (the "no compatible version"
    /// response).
    pub fn from_wire(bytes: [u8; 4]) -> Option<Self> {
        let (major, minor) = (bytes[3], bytes[2]);
        if major == 0 && minor == 0 {
            return None;
        }
        Some(Self { major, minor })
    }

    /// Encode to the 4-byte wire form.
    pub fn to_wire(self) -> [u8; 4] {
        [0, 0, self.minor, self.major]
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One client version proposal, possibly spanning a range of minors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionProposal {
    /// Highest version in the proposal
    pub version: BoltVersion,
    /// How many minor versions below [`Self::version`] are also acceptable
    pub range: u8,
}

impl VersionProposal {
    /// Parse a 4-byte proposal `[0, range, minor, major]`.
    ///
    /// Returns `None` for empty (all-zero) slots.
    pub fn from_wire(bytes: [u8; 4]) -> Option<Self> {
        let version = BoltVersion::from_wire([0, 0, bytes[2], bytes[3]])?;
        Some(Self { version, range: bytes[1] })
    }

    /// Whether this proposal covers the given version.
    pub fn covers(&self, candidate: BoltVersion) -> bool {
        if candidate.major != self.version.major {
            return false;
        }
        let floor = self.version.minor.saturating_sub(self.range);
        candidate.minor >= floor && candidate.minor <= self.version.minor
    }
}

/// Parse the 16-byte proposal block of a client handshake.
///
/// Empty slots are skipped; order of preference is preserved.
pub fn parse_proposals(data: &[u8]) -> Vec<VersionProposal> {
    data.chunks_exact(4)
        .take(4)
        .filter_map(|chunk| {
            let bytes: [u8; 4] = chunk.try_into().ok()?;
            VersionProposal::from_wire(bytes)
        })
        .collect()
}
