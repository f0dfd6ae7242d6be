//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Per item      │  │     Lifecycle           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Configuration  │  │  Transfer       │  │  AlreadyRunning         │ │
//! │  │  InvalidUrl     │  │  Backup         │  │  NotRunning             │ │
//! │  │  ConfigLoad     │  │  Local / Remote │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     State       │  │    Storage      │  │      Conflicts          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  StateLoad      │  │  Storage (db)   │  │  ConflictNotFound       │ │
//! │  │  StateSave      │  │  Serialization  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-item errors never stop the engine: the failing key is reported and
//! retried on the next cycle.

use thiserror::Error;
use uuid::Uuid;

use wikisync_core::{CoreError, SyncKey, ValidationError};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A required field is missing or a value is out of range.
    #[error("Invalid configuration for '{field}': {reason}")]
    Configuration { field: String, reason: String },

    /// Invalid wiki or webhook URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // State Errors
    // =========================================================================
    /// The persisted state could not be read or parsed.
    #[error("Failed to load sync state from {path}: {reason}")]
    StateLoad { path: String, reason: String },

    /// The state could not be written.
    #[error("Failed to save sync state: {0}")]
    StateSave(String),

    // =========================================================================
    // Per-Item Errors
    // =========================================================================
    /// Copying content between sides failed.
    #[error("Transfer failed for {key}: {reason}")]
    Transfer { key: SyncKey, reason: String },

    /// Taking a backup failed; the destructive write was not attempted.
    #[error("Backup failed for {key}: {reason}")]
    Backup { key: SyncKey, reason: String },

    /// Local filesystem operation failed.
    #[error("Local filesystem error: {0}")]
    Local(String),

    /// Remote API call failed.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Remote API rejected the request.
    #[error("Remote returned {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    /// Remote API call timed out.
    #[error("Remote request timed out")]
    Timeout,

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Backup catalog or blob store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// No catalog row has this id (never taken, or swept).
    #[error("Backup {0} not found")]
    BackupNotFound(Uuid),

    /// Stored bytes no longer match the digest recorded for them.
    #[error("Backup {id} of {key} is corrupt: {reason}")]
    BackupCorrupt {
        id: Uuid,
        key: SyncKey,
        reason: String,
    },

    /// JSON encoding or decoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Conflict Errors
    // =========================================================================
    /// No queued manual conflict has this id.
    #[error("Conflict {0} not found")]
    ConflictNotFound(Uuid),

    /// Domain rule violated.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// `start()` called on a running engine.
    #[error("Sync engine is already running")]
    AlreadyRunning,

    /// Operation requires a running engine.
    #[error("Sync engine is not running")]
    NotRunning,

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

// =============================================================================
// Constructors
// =============================================================================

impl SyncError {
    /// Configuration error for a named field.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Transfer error for a key.
    pub fn transfer(key: &SyncKey, reason: impl ToString) -> Self {
        SyncError::Transfer {
            key: key.clone(),
            reason: reason.to_string(),
        }
    }

    /// Backup error for a key.
    pub fn backup(key: &SyncKey, reason: impl ToString) -> Self {
        SyncError::Backup {
            key: key.clone(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<wikisync_db::DbError> for SyncError {
    fn from(err: wikisync_db::DbError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if let Some(status) = err.status() {
            SyncError::RemoteStatus {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SyncError::Remote(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Local(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried as-is.
    ///
    /// ## Retryable Errors
    /// - Network failures and timeouts
    /// - Server-side (5xx) and rate-limit (429) responses
    /// - Transfers, which are re-detected on the next cycle
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(_) | SyncError::Timeout | SyncError::Transfer { .. } => true,
            SyncError::RemoteStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::Configuration { .. }
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Remote("connection reset".into()).is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::RemoteStatus {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!SyncError::RemoteStatus {
            status: 403,
            message: "forbidden".into()
        }
        .is_retryable());
        assert!(!SyncError::config("local.root", "required").is_retryable());
        assert!(!SyncError::ConflictNotFound(Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn test_config_errors_name_the_field() {
        let err = SyncError::config("engine.state_path", "required");
        assert!(err.is_config_error());
        assert!(err.to_string().contains("engine.state_path"));
    }
}
