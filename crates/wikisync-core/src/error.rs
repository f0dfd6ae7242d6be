//! # Error Types
//!
//! Domain-specific error types for wikisync-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  wikisync-core errors (this file)                                      │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Key / input validation failures                │
//! │                                                                         │
//! │  wikisync-db errors (separate crate)                                   │
//! │  └── DbError          - Backup catalog failures                        │
//! │                                                                         │
//! │  wikisync-engine errors                                                │
//! │  └── SyncError        - What operators and notifiers see               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → CLI / Notifier        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A content hash string could not be parsed.
    ///
    /// ## When This Occurs
    /// - Corrupted state file entry
    /// - Remote metadata carrying a non-hex digest
    #[error("Invalid content hash '{value}': {reason}")]
    InvalidHash { value: String, reason: String },

    /// Unknown enum label (side, change kind, conflict kind, resolution).
    #[error("Unknown {what}: '{value}'")]
    UnknownVariant { what: &'static str, value: String },

    /// A resolution was requested that makes no sense for the conflict.
    #[error("Conflict {conflict_id} cannot be resolved with {resolution}: {reason}")]
    InvalidResolution {
        conflict_id: String,
        resolution: String,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised mostly by the key naming rule, before a path ever reaches the
/// queue or the remote API.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::UnknownVariant {
            what: "side",
            value: "middle".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown side: 'middle'");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "key".to_string(),
        };
        assert_eq!(err.to_string(), "key is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "key".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
