//! UCI config backend for OpenWrt-based nodes
//!
//! Keys map to `<package>.<section>.<option>`. Writes are staged by
//! `uci set` and only reach flash on [`ConfigStore::commit`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use super::traits::{split_key, ConfigError, ConfigStore};

/// UCI package holding the agent's settings
pub const DEFAULT_PACKAGE: &str = "wibed";

/// Store backed by the `uci` command line tool
pub struct UciStore {
    program: PathBuf,
    package: String,
}

impl UciStore {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            package: DEFAULT_PACKAGE.into(),
        }
    }

    /// Full UCI path for a store key
    pub fn uci_path(&self, key: &str) -> Result<String, ConfigError> {
        let (section, option) = split_key(key)?;
        Ok(format!("{}.{}.{}", self.package, section, option))
    }

    async fn run(&self, action: &'static str, key: &str, args: &[&str]) -> Result<Output, ConfigError> {
        debug!("uci {}", args.join(" "));
        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| ConfigError::Uci {
                action,
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn failure(action: &'static str, key: &str, output: &Output) -> ConfigError {
        ConfigError::Uci {
            action,
            key: key.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

#[async_trait]
impl ConfigStore for UciStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let path = self.uci_path(key)?;
        let output = self.run("get", key, &["-q", "get", &path]).await?;

        // uci exits non-zero for entries that do not exist
        if !output.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8_lossy(&output.stdout);
        Ok(Some(value.trim_end_matches(['\n', '\r']).to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let assignment = format!("{}={}", self.uci_path(key)?, value);
        let output = self.run("set", key, &["set", &assignment]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failure("set", key, &output))
        }
    }

    async fn unset(&self, key: &str) -> Result<(), ConfigError> {
        let path = self.uci_path(key)?;
        // Deleting a missing entry fails, which is fine here
        self.run("delete", key, &["-q", "delete", &path]).await?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), ConfigError> {
        let output = self
            .run("commit", &self.package, &["commit", &self.package])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Self::failure("commit", &self.package, &output))
        }
    }

    fn name(&self) -> &'static str {
        "uci"
    }
}
