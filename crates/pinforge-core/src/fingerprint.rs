//! Content fingerprints for descriptor change detection

use sha2::{Digest, Sha256};
use std::fmt;

/// Number of digest bytes kept in a fingerprint (128 bits)
const FINGERPRINT_BYTES: usize = 16;

/// Content digest of a file, rendered as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a previously rendered fingerprint (e.g. read back from the cache file)
    pub fn from_hex(hex: &str) -> Self {
        Self(hex.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of a byte buffer
///
/// SHA-256 truncated to its first 128 bits.
pub fn fingerprint(data: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    Fingerprint(hex::encode(&digest[..FINGERPRINT_BYTES]))
}
