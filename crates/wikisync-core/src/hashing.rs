//! # Content Hashing
//!
//! Provides the `ContentHash` type, the content-addressed digest every
//! synchronized document is compared by.
//!
//! ## Why Content Hashes?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE TIMESTAMP PROBLEM                                                  │
//! │                                                                         │
//! │  mtime changes on `touch`, on checkout, on copy.                       │
//! │  Wiki "updatedAt" changes when only page metadata is edited.           │
//! │                                                                         │
//! │  OUR SOLUTION: SHA-256 of the document bytes                           │
//! │    same bytes on both sides  →  same hash  →  nothing to transfer      │
//! │    different bytes           →  different hash → classify the change   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use wikisync_core::hashing::ContentHash;
//!
//! let a = ContentHash::of(b"# Notes\n");
//! let b = ContentHash::of(b"# Notes\n");
//! assert_eq!(a, b);
//! assert_eq!(a.to_hex().len(), 64);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// =============================================================================
// Content Hash
// =============================================================================

/// SHA-256 digest of a document's bytes.
///
/// Serialized as a lowercase 64 character hex string so the state file stays
/// human-readable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hashes a byte slice.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        ContentHash(digest.into())
    }

    /// Returns the raw digest bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the first 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| CoreError::InvalidHash {
            value: s.to_string(),
            reason: e.to_string(),
        })?;

        let digest: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| CoreError::InvalidHash {
            value: s.to_string(),
            reason: format!("expected 32 bytes, got {}", v.len()),
        })?;

        Ok(ContentHash(digest))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        let hash = ContentHash::of(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash.short(), "ba7816bf8f01");
    }

    #[test]
    fn test_different_bytes_differ() {
        assert_ne!(ContentHash::of(b"v1"), ContentHash::of(b"v2"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-hex".parse::<ContentHash>().is_err());
        assert!("abcd".parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_json_uses_hex_string() {
        let hash = ContentHash::of(b"abc");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));

        let parsed: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, hash);
    }
}
