//! Named-pipe sink and executor supervision
//!
//! The executor creates the pipe under a temporary name, opens it for
//! reading and only then renames it into place, so an existing pipe always
//! has a reader behind it unless the executor died.

use async_trait::async_trait;
use bytes::Bytes;
use nix::errno::Errno;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::traits::{ChannelError, CommandSink};

/// How to launch the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Executor binary
    pub program: PathBuf,
    /// Directory the executor writes results into
    pub results_dir: PathBuf,
    /// File receiving the executor's log output
    pub log_file: Option<PathBuf>,
}

/// Sink writing to the executor's named pipe
pub struct PipeSink {
    path: PathBuf,
    executor: ExecutorConfig,
    start_timeout: Duration,
    poll_interval: Duration,
    sender: Option<pipe::Sender>,
}

impl PipeSink {
    pub fn new(path: impl Into<PathBuf>, executor: ExecutorConfig, start_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            executor,
            start_timeout,
            poll_interval: Duration::from_millis(100),
            sender: None,
        }
    }

    fn pipe_error(&self, source: std::io::Error) -> ChannelError {
        ChannelError::Pipe {
            path: self.path.clone(),
            source,
        }
    }

    fn open_sender(&self) -> std::io::Result<pipe::Sender> {
        pipe::OpenOptions::new().open_sender(&self.path)
    }

    /// Launch the executor detached from this process
    fn spawn_executor(&self) -> Result<(), ChannelError> {
        let spawn_error = |source| ChannelError::Spawn {
            program: self.executor.program.clone(),
            source,
        };

        let stderr = match &self.executor.log_file {
            Some(path) => std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(Stdio::from)
                .map_err(spawn_error)?,
            None => Stdio::null(),
        };

        let child = std::process::Command::new(&self.executor.program)
            .arg("--pipe")
            .arg(&self.path)
            .arg("--results-dir")
            .arg(&self.executor.results_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(spawn_error)?;

        // Not waited on: the executor outlives this tick
        info!(
            "Spawned executor {} (pid {})",
            self.executor.program.display(),
            child.id()
        );
        Ok(())
    }

    /// Wait until the executor has put the pipe in place
    async fn wait_for_pipe(&self) -> Result<(), ChannelError> {
        let appeared = timeout(self.start_timeout, async {
            loop {
                if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
                    return;
                }
                sleep(self.poll_interval).await;
            }
        })
        .await;

        appeared.map_err(|_| ChannelError::StartupTimeout {
            path: self.path.clone(),
            timeout: self.start_timeout,
        })
    }

    /// Whether the pipe is in place
    pub async fn pipe_exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    async fn remove_pipe(&self) -> Result<(), ChannelError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.pipe_error(e)),
        }
    }
}

#[async_trait]
impl CommandSink for PipeSink {
    async fn attach(&mut self) -> Result<bool, ChannelError> {
        if self.sender.is_some() {
            return Ok(true);
        }
        if !self.pipe_exists().await {
            return Ok(false);
        }

        match self.open_sender() {
            Ok(sender) => {
                debug!("Executor already running on {}", self.path.display());
                self.sender = Some(sender);
                Ok(true)
            }
            // A pipe without a reader is left over from a dead executor
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                warn!("Removing stale pipe {}", self.path.display());
                self.remove_pipe().await?;
                Ok(false)
            }
            Err(e) => Err(self.pipe_error(e)),
        }
    }

    async fn ensure_executor_running(&mut self) -> Result<(), ChannelError> {
        if self.attach().await? {
            return Ok(());
        }

        self.spawn_executor()?;
        self.wait_for_pipe().await?;

        let sender = self.open_sender().map_err(|e| self.pipe_error(e))?;
        self.sender = Some(sender);
        Ok(())
    }

    async fn send_line(&mut self, line: Bytes) -> Result<(), ChannelError> {
        let Some(sender) = self.sender.as_mut() else {
            return Err(ChannelError::NotRunning);
        };
        let result = sender.write_all(&line).await;
        result.map_err(|e| self.pipe_error(e))
    }

    async fn retire(&mut self) -> Result<(), ChannelError> {
        self.sender = None;
        // The executor keeps its open descriptor and still reads the
        // sentinel; the path is free for the next executor
        self.remove_pipe().await
    }

    fn name(&self) -> &'static str {
        "pipe"
    }
}
