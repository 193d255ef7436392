//! Error types shared across the workspace.

use std::path::PathBuf;

/// Convenience result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An explicitly requested config file does not exist.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Validation found one or more invalid values.
    #[error("invalid configuration:\n  {}", .0.join("\n  "))]
    ConfigValidation(Vec<String>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
