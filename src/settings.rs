//! Resolved agent settings

use std::path::PathBuf;
use std::time::Duration;

use crate::config::BackendKind;

/// Everything the agent needs to know before it reads the config store
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Root of the flat-file config backend
    pub config_dir: PathBuf,
    pub config_backend: BackendKind,
    /// Where the executor writes one directory per command
    pub results_dir: PathBuf,
    /// Named pipe shared with the executor
    pub pipe: PathBuf,
    /// Executor program, looked up in PATH when relative
    pub executor: PathBuf,
    /// Append executor stderr here
    pub executor_log: Option<PathBuf>,
    pub firmware_dir: PathBuf,
    pub overlay_dir: PathBuf,
    /// Base URL for artifact downloads, the controller URL when unset
    pub artifact_url: Option<String>,
    pub firmware_hook: Option<PathBuf>,
    pub overlay_hook: Option<PathBuf>,
    /// Timeout for each controller request and artifact download
    pub http_timeout: Duration,
    /// How long to wait for the executor to open its pipe
    pub executor_start_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/wibed"),
            config_backend: BackendKind::Auto,
            results_dir: PathBuf::from("/tmp/wibed/results"),
            pipe: PathBuf::from("/tmp/wibed/pipe"),
            executor: PathBuf::from("wibed-executor"),
            executor_log: None,
            firmware_dir: PathBuf::from("/tmp/wibed/firmwares"),
            overlay_dir: PathBuf::from("/tmp/wibed/overlays"),
            artifact_url: None,
            firmware_hook: None,
            overlay_hook: None,
            http_timeout: Duration::from_secs(30),
            executor_start_timeout: Duration::from_secs(5),
        }
    }
}

impl AgentSettings {
    /// Artifact base URL, falling back to the controller URL
    pub fn artifact_base<'a>(&'a self, api_url: &'a str) -> &'a str {
        self.artifact_url.as_deref().unwrap_or(api_url)
    }
}
