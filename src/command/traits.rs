//! Sink abstraction for the executor command queue

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use wibed_shared::codec::CodecError;

/// Errors raised while talking to the executor
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to spawn executor {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("Executor did not create {path} within {timeout:?}")]
    StartupTimeout { path: PathBuf, timeout: Duration },

    #[error("Pipe {path}: {source}")]
    Pipe {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Executor is not running")]
    NotRunning,

    #[error("Encode error: {0}")]
    Codec(#[from] CodecError),
}

/// Destination of encoded command lines
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Connect to an executor that is already reading commands.
    ///
    /// Returns `false` when there is none. Leftovers of a dead executor are
    /// cleaned up but no new executor is started.
    async fn attach(&mut self) -> Result<bool, ChannelError>;

    /// Start the executor if needed and get ready to send
    async fn ensure_executor_running(&mut self) -> Result<(), ChannelError>;

    /// Write one encoded line
    async fn send_line(&mut self, line: Bytes) -> Result<(), ChannelError>;

    /// Detach from an executor that was told to exit.
    ///
    /// Lines queued behind its sentinel would be lost, so the next
    /// [`CommandSink::ensure_executor_running`] must start a new executor.
    async fn retire(&mut self) -> Result<(), ChannelError>;

    /// Human-readable name for this sink
    fn name(&self) -> &'static str;
}
