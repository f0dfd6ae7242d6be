//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     WIKISYNC_LOCAL_ROOT=/home/me/wiki                                  │
//! │     WIKISYNC_REMOTE_URL=https://wiki.example.com/graphql               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/wikisync/wikisync.toml (Linux)                           │
//! │     ~/Library/Application Support/org.wikisync.wikisync/... (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # wikisync.toml
//! [local]
//! root = "/home/me/wiki"
//!
//! [remote]
//! url = "https://wiki.example.com/graphql"
//! api_key = "..."
//! poll_interval_ms = 60000
//!
//! [engine]
//! batch_size = 10
//! max_concurrent = 3
//!
//! [conflicts]
//! auto_resolve_kinds = ["concurrent_modify"]
//! manual_resolve_kinds = ["structural", "local_delete_remote_modify", "remote_delete_local_modify"]
//! backup_on_resolve = true
//!
//! [backup]
//! retention_days = 30
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use wikisync_core::{ConflictKind, ResolutionPolicy, DEFAULT_MAX_FILE_SIZE};

// =============================================================================
// Local Settings
// =============================================================================

/// The watched document tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Root directory of the document tree. Required.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Watch for filesystem events. When false only rescans feed the queue.
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Quiet period before a burst of events for one path is emitted.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// File extensions that are documents.
    #[serde(default = "default_extensions")]
    pub include_extensions: Vec<String>,

    /// Directory names never descended into.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// Include dot-files and dot-directories.
    #[serde(default)]
    pub include_hidden: bool,

    /// Files larger than this are ignored.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_true() -> bool {
    true
}

fn default_debounce() -> u64 {
    1000
}

fn default_extensions() -> Vec<String> {
    vec![wikisync_core::key::DOCUMENT_EXTENSION.to_string()]
}

fn default_exclude_dirs() -> Vec<String> {
    [".git", "node_modules", ".wikisync"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

impl Default for LocalSettings {
    fn default() -> Self {
        LocalSettings {
            root: None,
            watch: true,
            debounce_ms: default_debounce(),
            include_extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
            include_hidden: false,
            max_file_size: default_max_file_size(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Which remote document API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteBackend {
    /// Wiki.js GraphQL API.
    #[default]
    WikiJs,

    /// In-process store, for dry runs and tests.
    Memory,
}

impl std::fmt::Display for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteBackend::WikiJs => write!(f, "wikijs"),
            RemoteBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for RemoteBackend {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wikijs" | "wiki.js" | "wiki" => Ok(RemoteBackend::WikiJs),
            "memory" | "mem" => Ok(RemoteBackend::Memory),
            other => Err(SyncError::config(
                "remote.backend",
                format!("unknown backend '{}', valid options: wikijs, memory", other),
            )),
        }
    }
}

/// The wiki side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub backend: RemoteBackend,

    /// GraphQL endpoint, e.g. `https://wiki.example.com/graphql`.
    #[serde(default)]
    pub url: Option<String>,

    /// API key sent as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Page locale.
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Poll the remote for changes. When false only `sync_now` polls.
    #[serde(default = "default_true")]
    pub poll: bool,

    /// Interval between remote polls (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per request before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff between attempts (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between attempts (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_poll_interval() -> u64 {
    60_000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    10
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            backend: RemoteBackend::default(),
            url: None,
            api_key: None,
            locale: default_locale(),
            poll: true,
            poll_interval_ms: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// Queue and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Where the state file lives. Required.
    #[serde(default = "default_state_path")]
    pub state_path: Option<PathBuf>,

    /// Interval between queue checks (milliseconds).
    #[serde(default = "default_tick")]
    pub tick_ms: u64,

    /// Queue entries taken per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Units processed in parallel within a batch.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Capacity of the engine's message channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_state_path() -> Option<PathBuf> {
    SyncConfig::data_dir().map(|dir| dir.join("state.json"))
}

fn default_tick() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    10
}

fn default_max_concurrent() -> usize {
    3
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            state_path: default_state_path(),
            tick_ms: default_tick(),
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

// =============================================================================
// Conflict Settings
// =============================================================================

/// Which conflicts resolve themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictSettings {
    #[serde(default = "default_auto_kinds")]
    pub auto_resolve_kinds: BTreeSet<ConflictKind>,

    #[serde(default = "default_manual_kinds")]
    pub manual_resolve_kinds: BTreeSet<ConflictKind>,

    /// Back up both sides before any resolution.
    #[serde(default = "default_true")]
    pub backup_on_resolve: bool,
}

fn default_auto_kinds() -> BTreeSet<ConflictKind> {
    ResolutionPolicy::default().auto_resolve_kinds
}

fn default_manual_kinds() -> BTreeSet<ConflictKind> {
    ResolutionPolicy::default().manual_resolve_kinds
}

impl Default for ConflictSettings {
    fn default() -> Self {
        ConflictSettings {
            auto_resolve_kinds: default_auto_kinds(),
            manual_resolve_kinds: default_manual_kinds(),
            backup_on_resolve: true,
        }
    }
}

impl ConflictSettings {
    /// The resolution policy these settings describe.
    pub fn policy(&self) -> ResolutionPolicy {
        ResolutionPolicy {
            auto_resolve_kinds: self.auto_resolve_kinds.clone(),
            manual_resolve_kinds: self.manual_resolve_kinds.clone(),
        }
    }
}

// =============================================================================
// Backup Settings
// =============================================================================

/// Backup storage and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Backup directory (catalog plus blobs). Required.
    #[serde(default = "default_backup_dir")]
    pub dir: Option<PathBuf>,

    /// Backups older than this are swept, except each key's newest.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Interval between retention sweeps (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_backup_dir() -> Option<PathBuf> {
    SyncConfig::data_dir().map(|dir| dir.join("backups"))
}

fn default_retention_days() -> u32 {
    30
}

fn default_sweep_interval() -> u64 {
    24 * 60 * 60
}

impl Default for BackupSettings {
    fn default() -> Self {
        BackupSettings {
            dir: default_backup_dir(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

// =============================================================================
// Notify Settings
// =============================================================================

/// Where notifications go besides the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifySettings {
    /// POST each notification as JSON to this URL.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Webhook request timeout (seconds).
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub local: LocalSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub conflicts: ConflictSettings,

    #[serde(default)]
    pub backup: BackupSettings,

    #[serde(default)]
    pub notify: NotifySettings,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (wikisync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates value ranges and URLs. Missing required paths are checked
    /// separately by [`SyncConfig::check_required`] so offline commands can
    /// still load a partial config.
    pub fn validate(&self) -> SyncResult<()> {
        if self.engine.batch_size == 0 {
            return Err(SyncError::config("engine.batch_size", "must be greater than 0"));
        }
        if self.engine.max_concurrent == 0 {
            return Err(SyncError::config(
                "engine.max_concurrent",
                "must be greater than 0",
            ));
        }
        if self.engine.tick_ms == 0 {
            return Err(SyncError::config("engine.tick_ms", "must be greater than 0"));
        }
        if self.engine.channel_capacity == 0 {
            return Err(SyncError::config(
                "engine.channel_capacity",
                "must be greater than 0",
            ));
        }
        if self.remote.poll_interval_ms == 0 {
            return Err(SyncError::config(
                "remote.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.remote.max_retries == 0 {
            return Err(SyncError::config("remote.max_retries", "must be at least 1"));
        }
        if self.backup.sweep_interval_secs == 0 {
            return Err(SyncError::config(
                "backup.sweep_interval_secs",
                "must be greater than 0",
            ));
        }

        let overlap: Vec<_> = self
            .conflicts
            .auto_resolve_kinds
            .intersection(&self.conflicts.manual_resolve_kinds)
            .collect();
        if !overlap.is_empty() {
            warn!(?overlap, "Conflict kinds listed as both auto and manual resolve as manual");
        }

        if let Some(ref raw) = self.remote.url {
            validate_http_url(raw)?;
        }
        if let Some(ref raw) = self.notify.webhook_url {
            validate_http_url(raw)?;
        }

        Ok(())
    }

    /// Checks the fields the engine cannot start without.
    pub fn check_required(&self) -> SyncResult<()> {
        if self.local.root.is_none() {
            return Err(SyncError::config("local.root", "required"));
        }
        if self.engine.state_path.is_none() {
            return Err(SyncError::config("engine.state_path", "required"));
        }
        if self.backup.dir.is_none() {
            return Err(SyncError::config("backup.dir", "required"));
        }
        if self.remote.backend == RemoteBackend::WikiJs && self.remote.url.is_none() {
            return Err(SyncError::config("remote.url", "required for the wikijs backend"));
        }
        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("WIKISYNC_LOCAL_ROOT") {
            debug!(root = %root, "Overriding local root from environment");
            self.local.root = Some(PathBuf::from(root));
        }

        if let Ok(url) = std::env::var("WIKISYNC_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.url = Some(url);
        }

        if let Ok(key) = std::env::var("WIKISYNC_API_KEY") {
            self.remote.api_key = Some(key);
        }

        if let Ok(backend) = std::env::var("WIKISYNC_REMOTE_BACKEND") {
            match backend.parse() {
                Ok(parsed) => self.remote.backend = parsed,
                Err(_) => warn!(backend = %backend, "Unknown remote backend in environment"),
            }
        }

        if let Ok(size) = std::env::var("WIKISYNC_BATCH_SIZE") {
            if let Ok(n) = size.parse::<usize>() {
                debug!(batch_size = n, "Overriding batch size from environment");
                self.engine.batch_size = n;
            }
        }

        if let Ok(max) = std::env::var("WIKISYNC_MAX_CONCURRENT") {
            if let Ok(n) = max.parse::<usize>() {
                self.engine.max_concurrent = n;
            }
        }

        if let Ok(interval) = std::env::var("WIKISYNC_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.remote.poll_interval_ms = ms;
            }
        }

        if let Ok(path) = std::env::var("WIKISYNC_STATE_PATH") {
            self.engine.state_path = Some(PathBuf::from(path));
        }

        if let Ok(dir) = std::env::var("WIKISYNC_BACKUP_DIR") {
            self.backup.dir = Some(PathBuf::from(dir));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "wikisync", "wikisync")
            .map(|dirs| dirs.config_dir().join("wikisync.toml"))
    }

    /// Returns the platform data directory for state and backups.
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "wikisync", "wikisync")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.engine.tick_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.remote.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.local.debounce_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.backup.sweep_interval_secs)
    }

    /// Backup retention as a chrono duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.backup.retention_days))
    }

    /// A config pointing every path into `dir`, with an in-memory remote.
    pub fn for_directory(dir: &std::path::Path) -> Self {
        let mut config = SyncConfig::default();
        config.local.root = Some(dir.join("docs"));
        config.remote.backend = RemoteBackend::Memory;
        config.engine.state_path = Some(dir.join("state.json"));
        config.backup.dir = Some(dir.join("backups"));
        config
    }
}

fn validate_http_url(raw: &str) -> SyncResult<()> {
    let parsed = url::Url::parse(raw)?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SyncError::InvalidUrl(format!(
            "URL must use http or https, got {}: {}",
            other, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.engine.batch_size, 10);
        assert_eq!(config.engine.max_concurrent, 3);
        assert_eq!(config.engine.tick_ms, 1000);
        assert_eq!(config.local.debounce_ms, 1000);
        assert_eq!(config.remote.poll_interval_ms, 60_000);
        assert_eq!(config.backup.retention_days, 30);
        assert!(config.conflicts.backup_on_resolve);
        assert!(config.conflicts.policy().is_auto(ConflictKind::ConcurrentModify));
        assert!(!config.conflicts.policy().is_auto(ConflictKind::Structural));
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();
        assert!(config.validate().is_ok());

        config.engine.batch_size = 0;
        assert!(config.validate().is_err());
        config.engine.batch_size = 10;

        config.remote.url = Some("ftp://wiki.example.com".to_string());
        assert!(config.validate().is_err());

        config.remote.url = Some("https://wiki.example.com/graphql".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_required_fields() {
        let mut config = SyncConfig::default();
        config.engine.state_path = Some(PathBuf::from("/tmp/state.json"));
        config.backup.dir = Some(PathBuf::from("/tmp/backups"));

        let err = config.check_required().unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("local.root"));

        config.local.root = Some(PathBuf::from("/tmp/docs"));
        let err = config.check_required().unwrap_err();
        assert!(err.to_string().contains("remote.url"));

        config.remote.backend = RemoteBackend::Memory;
        assert!(config.check_required().is_ok());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("wikijs".parse::<RemoteBackend>().unwrap(), RemoteBackend::WikiJs);
        assert_eq!("Memory".parse::<RemoteBackend>().unwrap(), RemoteBackend::Memory);
        assert!("s3".parse::<RemoteBackend>().is_err());
    }

    #[test]
    fn test_toml_round_trip_with_partial_file() {
        let toml_str = r#"
            [local]
            root = "/srv/wiki"

            [engine]
            batch_size = 25

            [conflicts]
            auto_resolve_kinds = ["concurrent_modify", "local_delete_remote_modify"]
            manual_resolve_kinds = ["structural"]
        "#;

        let config: SyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.local.root, Some(PathBuf::from("/srv/wiki")));
        assert_eq!(config.engine.batch_size, 25);
        assert_eq!(config.engine.max_concurrent, 3);
        assert!(config
            .conflicts
            .policy()
            .is_auto(ConflictKind::LocalDeleteRemoteModify));

        let serialized = toml::to_string_pretty(&config).unwrap();
        let back: SyncConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(back.engine.batch_size, 25);
    }
}
