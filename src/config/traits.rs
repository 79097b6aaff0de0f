//! Key/value store abstraction for persisted node settings

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a config backend
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing mandatory setting {0}")]
    MissingKey(&'static str),

    #[error("Invalid key {0:?}: expected <section>.<option>")]
    InvalidKey(String),

    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("uci {action} {key} failed: {reason}")]
    Uci {
        action: &'static str,
        key: String,
        reason: String,
    },
}

/// A key/value store holding node identity and lifecycle variables.
///
/// Keys have the form `<section>.<option>`.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read a value, `None` if the key is not set
    async fn get(&self, key: &str) -> Result<Option<String>, ConfigError>;

    /// Write a value
    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;

    /// Remove a value; removing a missing key is not an error
    async fn unset(&self, key: &str) -> Result<(), ConfigError>;

    /// Flush staged writes
    async fn commit(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Human-readable name for this backend
    fn name(&self) -> &'static str;

    /// Read a mandatory value
    async fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        match self.get(key).await? {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ConfigError::MissingKey(key)),
        }
    }
}

/// Split `<section>.<option>` into its parts
pub fn split_key(key: &str) -> Result<(&str, &str), ConfigError> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    };
    match key.split_once('.') {
        Some((section, option)) if valid_part(section) && valid_part(option) => {
            Ok((section, option))
        }
        _ => Err(ConfigError::InvalidKey(key.to_string())),
    }
}
