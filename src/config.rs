//! Configuration file parser for ~/.config/feedsync/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{
    FetchSettings, Intermediary, DEFAULT_BACKOFF_MS, DEFAULT_TIMEOUT_MS, MAX_DOCUMENT_SIZE,
};
use crate::sync::{SyncOptions, DEFAULT_EXCERPT_WIDTH, DEFAULT_MAX_CONCURRENT_SYNCS};

/// Environment variable that overrides the `principal` key.
pub const PRINCIPAL_ENV: &str = "FEEDSYNC_PRINCIPAL";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file; the platform data directory is used when unset.
    pub database_path: Option<String>,

    /// Owner of personal-scope feeds ([`PRINCIPAL_ENV`] takes precedence).
    pub principal: Option<String>,

    /// Interval for `feedsync watch`, in minutes. 0 = manual sync only.
    pub sync_interval_minutes: u64,

    /// Feeds synced at once by a batch sync.
    pub max_concurrent_syncs: usize,

    /// Display width of stored entry excerpts.
    pub excerpt_width: usize,

    pub network: NetworkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            principal: None,
            sync_interval_minutes: 0,
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
            excerpt_width: DEFAULT_EXCERPT_WIDTH,
            network: NetworkConfig::default(),
        }
    }
}

/// `[network]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout covering the whole transfer.
    pub timeout_ms: u64,

    /// Pause between failed intermediaries.
    pub backoff_ms: u64,

    /// Route fetches through `intermediaries` instead of connecting directly.
    pub restricted: bool,

    pub max_document_bytes: usize,

    /// Relays in priority order (`[[network.intermediaries]]`).
    pub intermediaries: Vec<Intermediary>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            restricted: false,
            max_document_bytes: MAX_DOCUMENT_SIZE,
            intermediaries: Intermediary::defaults(),
        }
    }
}

impl NetworkConfig {
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            backoff: Duration::from_millis(self.backoff_ms),
            max_document_bytes: self.max_document_bytes,
        }
    }
}

const KNOWN_KEYS: [&str; 6] = [
    "database_path",
    "principal",
    "sync_interval_minutes",
    "max_concurrent_syncs",
    "excerpt_width",
    "network",
];

const KNOWN_NETWORK_KEYS: [&str; 5] = [
    "timeout_ms",
    "backoff_ms",
    "restricted",
    "max_document_bytes",
    "intermediaries",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero timeout or an intermediary without a prefix → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            restricted = config.network.restricted,
            interval_minutes = config.sync_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.network.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(relay) = self
            .network
            .intermediaries
            .iter()
            .find(|r| r.url_prefix.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "intermediary '{}' has an empty url_prefix",
                relay.name
            )));
        }
        Ok(())
    }

    /// The principal for personal scope: `env_value` (normally
    /// [`PRINCIPAL_ENV`]) wins over the file. Blank values count as unset.
    pub fn principal(&self, env_value: Option<String>) -> Option<String> {
        let non_blank = |p: &str| Some(p.trim().to_string()).filter(|p| !p.is_empty());
        env_value
            .as_deref()
            .and_then(non_blank)
            .or_else(|| self.principal.as_deref().and_then(non_blank))
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_concurrent_syncs: self.max_concurrent_syncs.max(1),
            excerpt_width: self.excerpt_width,
        }
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    if let Some(network) = raw.get("network").and_then(|v| v.as_table()) {
        for key in network.keys() {
            if !KNOWN_NETWORK_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in [network], ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
