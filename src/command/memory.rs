//! In-memory sink standing in for the executor pipe

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::traits::{ChannelError, CommandSink};

/// Sink that hands every line to an mpsc receiver
pub struct MemorySink {
    tx: mpsc::UnboundedSender<Bytes>,
    running: bool,
    fail_start: bool,
    /// Number of times the executor was started
    pub starts: Arc<AtomicUsize>,
}

impl MemorySink {
    /// Sink with no executor running yet
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            tx,
            running: false,
            fail_start: false,
            starts: Arc::new(AtomicUsize::new(0)),
        };
        (sink, rx)
    }

    /// Sink whose executor is already up
    pub fn running() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (mut sink, rx) = Self::new();
        sink.running = true;
        (sink, rx)
    }

    /// Sink whose executor never comes up
    pub fn failing() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (mut sink, rx) = Self::new();
        sink.fail_start = true;
        (sink, rx)
    }
}

#[async_trait]
impl CommandSink for MemorySink {
    async fn attach(&mut self) -> Result<bool, ChannelError> {
        Ok(self.running)
    }

    async fn ensure_executor_running(&mut self) -> Result<(), ChannelError> {
        if self.fail_start {
            return Err(ChannelError::StartupTimeout {
                path: "memory".into(),
                timeout: std::time::Duration::ZERO,
            });
        }
        if !self.running {
            self.running = true;
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send_line(&mut self, line: Bytes) -> Result<(), ChannelError> {
        if !self.running {
            return Err(ChannelError::NotRunning);
        }
        self.tx.send(line).map_err(|_| ChannelError::NotRunning)
    }

    async fn retire(&mut self) -> Result<(), ChannelError> {
        self.running = false;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Decode everything received so far
pub fn drain_lines(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<String> {
    let mut decoder = wibed_shared::codec::LineDecoder::new();
    while let Ok(line) = rx.try_recv() {
        decoder.extend(&line);
    }
    let mut lines = Vec::new();
    while let Ok(Some(record)) = decoder.decode_next() {
        lines.push(format!("{} {}", record.id, record.command));
    }
    lines
}
