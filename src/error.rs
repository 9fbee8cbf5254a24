//! Error types for Mnemo
//!
//! This module defines all error types used throughout the library,
//! using `thiserror` for ergonomic error handling.
//!
//! Expected degraded conditions (an unavailable persistence layer, an
//! unknown session, a stale or corrupt cache entry) are never surfaced
//! through these types; they are reported through explicit result values
//! such as [`crate::memory::Append::SessionNotFound`] and
//! [`crate::memory::CacheLookup::Miss`]. Errors here are reserved for
//! programmer mistakes and unrecoverable storage faults.

use thiserror::Error;

/// Main error type for Mnemo operations
#[derive(Error, Debug)]
pub enum MnemoError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session or cache storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// An unrecognized message role was supplied
    #[error("Invalid message role: {0}")]
    InvalidRole(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Mnemo operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
