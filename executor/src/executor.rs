//! Read loop: decode commands from the pipe and run them in order

use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tracing::{error, info, warn};
use wibed_shared::codec::LineDecoder;

use crate::fifo::{self, PipeId};
use crate::runner;

/// Executor bound to one pipe and one results directory
pub struct Executor {
    pipe: PathBuf,
    results_dir: PathBuf,
}

impl Executor {
    pub fn new(pipe: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipe: pipe.into(),
            results_dir: results_dir.into(),
        }
    }

    /// Create the pipe and serve it until the exit sentinel arrives
    pub async fn run(&self) -> anyhow::Result<()> {
        let (receiver, id) = fifo::open_pipe(&self.pipe)?;
        info!("Listening on {}", self.pipe.display());

        let result = self.serve(receiver, id).await;
        fifo::remove_if_owned(&self.pipe, id)?;
        result
    }

    async fn serve(&self, mut receiver: pipe::Receiver, id: PipeId) -> anyhow::Result<()> {
        let mut decoder = LineDecoder::new();
        let mut buf = vec![0u8; 4096];

        loop {
            let n = receiver.read(&mut buf).await?;
            if n == 0 {
                warn!("Pipe closed");
                return Ok(());
            }
            decoder.extend(&buf[..n]);

            loop {
                let record = match decoder.decode_next() {
                    Ok(Some(record)) => record,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Skipping bad line: {}", e);
                        continue;
                    }
                };

                if record.is_sentinel() {
                    info!("Exit sentinel received");
                    return Ok(());
                }
                if record.id < 0 {
                    warn!("Skipping command with negative id {}", record.id);
                    continue;
                }

                let outcome = runner::execute(&record).await;
                // Once the agent has unlinked our pipe the experiment is over
                // and its results were already cleared.
                if !fifo::is_owned(&self.pipe, id) {
                    info!("Pipe retired, dropping result of command {}", record.id);
                    continue;
                }
                if let Err(e) = runner::store(record.id, &outcome, &self.results_dir).await {
                    error!("Could not record result of command {}: {:#}", record.id, e);
                }
            }
        }
    }
}
