//! External install hooks
//!
//! Flashing firmware and applying overlays are platform specific, so the
//! agent delegates them to an optional program that receives the artifact
//! path as its only argument.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
}

/// Optional program that installs a downloaded artifact
#[derive(Debug, Clone)]
pub struct InstallHook {
    label: &'static str,
    program: Option<PathBuf>,
}

impl InstallHook {
    pub fn new(label: &'static str, program: Option<PathBuf>) -> Self {
        Self { label, program }
    }

    /// Hook that does nothing
    pub fn disabled(label: &'static str) -> Self {
        Self::new(label, None)
    }

    /// Run the hook on an artifact.
    ///
    /// Returns `Ok(false)` when no hook is configured.
    pub async fn run(&self, artifact: &Path, env: &[(&str, String)]) -> Result<bool, HookError> {
        let Some(program) = &self.program else {
            info!(
                "No {} hook configured, leaving {} in place",
                self.label,
                artifact.display()
            );
            return Ok(false);
        };

        info!("Running {} hook {}", self.label, program.display());
        let output = Command::new(program)
            .arg(artifact)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .output()
            .await
            .map_err(|source| HookError::Spawn {
                program: program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(true)
        } else {
            Err(HookError::Failed {
                program: program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
