//! Error types shared across the AIS workspace

use thiserror::Error;

/// Result type alias for AIS operations outside the stage pipeline
pub type Result<T> = std::result::Result<T, AisError>;

/// Shared error type for configuration and environment problems
#[derive(Error, Debug)]
pub enum AisError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: String, value: String },
}

impl AisError {
    pub fn config(message: impl Into<String>) -> Self {
        AisError::Config(message.into())
    }
}

/// Read an optional environment variable and parse it, reporting malformed values
/// instead of silently falling back to the default.
pub fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|_| AisError::InvalidEnv {
            name: name.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

/// Read an environment variable, falling back to `default` when unset.
pub fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
