//! # Key Naming Rule
//!
//! A key is the stable identity shared by a local path and its remote page.
//!
//! ```text
//! local root: /home/me/notes
//!
//!   /home/me/notes/ops/backup.md   ──►  key "ops/backup.md"  ──►  page "ops/backup"
//!   page "runbooks/dns"            ──►  key "runbooks/dns.md"
//! ```
//!
//! ## Rules
//! - Path relative to the local root, `/` separators
//! - Not empty, no `..` or `.` segments, no empty segments
//! - Not absolute, no backslashes, no control characters
//! - At most [`MAX_KEY_LENGTH`] bytes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::ValidationError;

/// Longest accepted key, in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Extension appended when mapping a page path back to a key.
pub const DOCUMENT_EXTENSION: &str = "md";

/// Result type for key validation.
pub type KeyResult<T> = Result<T, ValidationError>;

// =============================================================================
// SyncKey
// =============================================================================

/// A validated synchronization key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncKey(String);

impl SyncKey {
    /// Validates and wraps a key string.
    ///
    /// ## Example
    /// ```rust
    /// use wikisync_core::key::SyncKey;
    ///
    /// assert!(SyncKey::new("notes/a.md").is_ok());
    /// assert!(SyncKey::new("../escape.md").is_err());
    /// assert!(SyncKey::new("/etc/passwd").is_err());
    /// ```
    pub fn new(key: impl Into<String>) -> KeyResult<Self> {
        let key = key.into();
        validate_key(&key)?;
        Ok(SyncKey(key))
    }

    /// Builds a key from an absolute path below `root`.
    pub fn from_path(root: &Path, path: &Path) -> KeyResult<Self> {
        let relative = path
            .strip_prefix(root)
            .map_err(|_| ValidationError::InvalidFormat {
                field: "key".to_string(),
                reason: format!("{} is outside {}", path.display(), root.display()),
            })?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| ValidationError::InvalidFormat {
                        field: "key".to_string(),
                        reason: "path is not valid UTF-8".to_string(),
                    })?;
                    segments.push(part);
                }
                _ => {
                    return Err(ValidationError::InvalidFormat {
                        field: "key".to_string(),
                        reason: format!("unexpected component in {}", relative.display()),
                    })
                }
            }
        }

        SyncKey::new(segments.join("/"))
    }

    /// Maps a remote page path back to a key (`runbooks/dns` → `runbooks/dns.md`).
    pub fn from_page_path(page_path: &str) -> KeyResult<Self> {
        let trimmed = page_path.trim_matches('/');
        SyncKey::new(format!("{trimmed}.{DOCUMENT_EXTENSION}"))
    }

    /// Returns the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the remote page path (key without the `.md` extension).
    pub fn page_path(&self) -> &str {
        let suffix = format!(".{DOCUMENT_EXTENSION}");
        self.0.strip_suffix(suffix.as_str()).unwrap_or(&self.0)
    }

    /// Returns the last path segment without extension, used as a page title.
    pub fn title(&self) -> &str {
        let page = self.page_path();
        page.rsplit('/').next().unwrap_or(page)
    }

    /// Resolves the key to an absolute path below `root`.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, seg| acc.join(seg))
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SyncKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SyncKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SyncKey::new(value)
    }
}

impl From<SyncKey> for String {
    fn from(key: SyncKey) -> Self {
        key.0
    }
}

// =============================================================================
// Validators
// =============================================================================

/// Validates a raw key string against the naming rule.
pub fn validate_key(key: &str) -> KeyResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "key".to_string(),
        });
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(ValidationError::TooLong {
            field: "key".to_string(),
            max: MAX_KEY_LENGTH,
        });
    }

    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "key".to_string(),
        reason: reason.to_string(),
    };

    if key.starts_with('/') || Path::new(key).is_absolute() {
        return Err(invalid("must be relative"));
    }

    if key.contains('\\') {
        return Err(invalid("must use '/' separators"));
    }

    if key.chars().any(char::is_control) {
        return Err(invalid("must not contain control characters"));
    }

    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid("must not contain empty segments")),
            "." | ".." => return Err(invalid("must not contain '.' or '..' segments")),
            _ => {}
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(SyncKey::new("a.md").is_ok());
        assert!(SyncKey::new("notes/a.md").is_ok());
        assert!(SyncKey::new("deep/er/still/page.md").is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            SyncKey::new(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(SyncKey::new("../up.md").is_err());
        assert!(SyncKey::new("a/../b.md").is_err());
        assert!(SyncKey::new("/abs.md").is_err());
        assert!(SyncKey::new("win\\path.md").is_err());
        assert!(SyncKey::new("a//b.md").is_err());
        assert!(SyncKey::new("trailing/").is_err());
        assert!(matches!(
            SyncKey::new("x".repeat(MAX_KEY_LENGTH + 1)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_page_path_mapping() {
        let key = SyncKey::new("runbooks/dns.md").unwrap();
        assert_eq!(key.page_path(), "runbooks/dns");
        assert_eq!(key.title(), "dns");

        let back = SyncKey::from_page_path("runbooks/dns").unwrap();
        assert_eq!(back, key);

        let leading = SyncKey::from_page_path("/runbooks/dns").unwrap();
        assert_eq!(leading, key);
    }

    #[test]
    fn test_path_round_trip() {
        let root = Path::new("/srv/notes");
        let key = SyncKey::from_path(root, Path::new("/srv/notes/ops/backup.md")).unwrap();
        assert_eq!(key.as_str(), "ops/backup.md");
        assert_eq!(key.to_path(root), PathBuf::from("/srv/notes/ops/backup.md"));

        assert!(SyncKey::from_path(root, Path::new("/etc/passwd")).is_err());
        assert!(SyncKey::from_path(root, root).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<SyncKey, _> = serde_json::from_str("\"a/b.md\"");
        assert!(ok.is_ok());

        let bad: Result<SyncKey, _> = serde_json::from_str("\"../b.md\"");
        assert!(bad.is_err());
    }
}
