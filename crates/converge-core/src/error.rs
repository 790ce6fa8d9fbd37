//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration parsing.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while reading or interpreting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration '{0}' (expected e.g. \"500ms\", \"15s\", \"5m\")")]
    Duration(String),

    #[error("invalid count or percentage '{0}'")]
    Quantity(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
