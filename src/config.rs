//! Configuration management for Mnemo
//!
//! This module handles loading, parsing, and validating configuration
//! from files, with sensible defaults for every setting.

use crate::error::{MnemoError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for the memory subsystem
///
/// Every field has a default, so an empty config file (or none at all)
/// yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryConfig {
    /// Persistent storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Memory compaction settings
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Analysis result cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Persistent storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path; when unset, a per-user data directory is used
    ///
    /// The `MNEMO_DB` environment variable overrides both.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Skip persistence entirely and run memory-only
    #[serde(default)]
    pub ephemeral: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            ephemeral: false,
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Per-session token ceiling; exceeding it triggers compaction
    #[serde(default = "default_max_session_tokens")]
    pub max_session_tokens: usize,

    /// On hydrate, restore sessions updated within this many hours
    #[serde(default = "default_hydrate_window_hours")]
    pub hydrate_window_hours: u64,

    /// On hydrate, restore at most this many sessions
    #[serde(default = "default_hydrate_session_limit")]
    pub hydrate_session_limit: usize,

    /// On hydrate, restore at most this many recent messages per session
    #[serde(default = "default_hydrate_message_limit")]
    pub hydrate_message_limit: usize,
}

fn default_max_session_tokens() -> usize {
    50_000
}

fn default_hydrate_window_hours() -> u64 {
    24
}

fn default_hydrate_session_limit() -> usize {
    50
}

fn default_hydrate_message_limit() -> usize {
    20
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_session_tokens: default_max_session_tokens(),
            hydrate_window_hours: default_hydrate_window_hours(),
            hydrate_session_limit: default_hydrate_session_limit(),
            hydrate_message_limit: default_hydrate_message_limit(),
        }
    }
}

/// Memory compaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Messages preserved verbatim by the summarization stage
    #[serde(default = "default_retain_recent")]
    pub retain_recent: usize,

    /// Non-system message count that triggers the hard cap stage
    #[serde(default = "default_hard_cap")]
    pub hard_cap: usize,

    /// Non-system messages kept by the hard cap stage
    #[serde(default = "default_hard_cap_keep")]
    pub hard_cap_keep: usize,
}

fn default_retain_recent() -> usize {
    10
}

fn default_hard_cap() -> usize {
    20
}

fn default_hard_cap_keep() -> usize {
    10
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            retain_recent: default_retain_recent(),
            hard_cap: default_hard_cap(),
            hard_cap_keep: default_hard_cap_keep(),
        }
    }
}

/// Analysis result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live in hours
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u64,
}

fn default_cache_ttl_hours() -> u64 {
    24
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_cache_ttl_hours(),
        }
    }
}

impl MemoryConfig {
    /// Loads configuration from a YAML file, falling back to defaults
    /// when the file does not exist
    pub fn load(path: &str) -> Result<Self> {
        let config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MnemoError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| MnemoError::Config(format!("Failed to parse config: {}", e)).into())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.session.max_session_tokens == 0 {
            return Err(MnemoError::Config(
                "session.max_session_tokens must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.hydrate_session_limit == 0 {
            return Err(MnemoError::Config(
                "session.hydrate_session_limit must be greater than 0".to_string(),
            )
            .into());
        }

        if self.compaction.retain_recent == 0 {
            return Err(MnemoError::Config(
                "compaction.retain_recent must be greater than 0".to_string(),
            )
            .into());
        }

        if self.compaction.hard_cap_keep == 0 {
            return Err(MnemoError::Config(
                "compaction.hard_cap_keep must be greater than 0".to_string(),
            )
            .into());
        }

        if self.compaction.hard_cap_keep > self.compaction.hard_cap {
            return Err(MnemoError::Config(format!(
                "compaction.hard_cap_keep ({}) must not exceed compaction.hard_cap ({})",
                self.compaction.hard_cap_keep, self.compaction.hard_cap
            ))
            .into());
        }

        Ok(())
    }
}
