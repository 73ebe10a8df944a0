//! Error types for DTX Core

use std::path::PathBuf;

/// Errors raised by the shared model and configuration layer
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Hex color string did not match `#RGB`, `#RRGGBB` or `#RRGGBBAA`
    #[error("invalid hex color: '{0}'")]
    InvalidHex(String),

    /// Unknown token category name
    #[error("unknown token category: '{0}'")]
    UnknownCategory(String),

    /// Unknown validation mode name
    #[error("unknown validation mode: '{0}' (expected 'strict' or 'lenient')")]
    UnknownValidationMode(String),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Environment override could not be parsed
    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },

    /// IO error reading a configuration file
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
