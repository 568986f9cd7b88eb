//! Unified error types for netwarden

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for netwarden operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // State store errors
    #[error("Failed to read state file '{path}': {source}")]
    StateRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write state file '{path}': {message}")]
    StateWrite { path: PathBuf, message: String },

    // Detection errors
    #[error("Process enumeration failed: {0}")]
    ProcessEnumeration(String),

    // Remediation errors
    #[error("Reboot command '{command}' failed: {message}")]
    RebootFailed { command: String, message: String },

    #[error("Reboot command timeout after {0} seconds")]
    RebootTimeout(u64),
}

/// Result type alias for netwarden operations
pub type Result<T> = std::result::Result<T, Error>;
