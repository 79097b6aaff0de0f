//! Command channel: ordered, exactly-once delivery of commands to the executor

use tracing::{debug, error, info, warn};
use wibed_shared::{codec, CommandRecord};

use super::traits::{ChannelError, CommandSink};
use crate::node::NodeState;

/// Delivers controller commands to the executor
pub struct CommandChannel {
    sink: Box<dyn CommandSink>,
}

impl CommandChannel {
    pub fn new(sink: Box<dyn CommandSink>) -> Self {
        Self { sink }
    }

    /// Send every command above `commandAck`, in ascending id order.
    ///
    /// `state.command_ack` advances after each line written, so a failure
    /// part way through never causes a resend of what already went out.
    /// Returns the number of commands written.
    pub async fn dispatch(
        &mut self,
        commands: &[CommandRecord],
        state: &mut NodeState,
    ) -> Result<usize, ChannelError> {
        let mut fresh: Vec<&CommandRecord> = commands
            .iter()
            .filter(|c| {
                if c.id < 0 {
                    warn!("Ignoring command with negative id {}", c.id);
                    return false;
                }
                state.command_ack.map_or(true, |ack| c.id > ack)
            })
            .collect();
        fresh.sort_by_key(|c| c.id);

        if fresh.is_empty() {
            debug!(
                "No new commands (received {}, commandAck {:?})",
                commands.len(),
                state.command_ack
            );
            return Ok(0);
        }

        self.sink.ensure_executor_running().await?;

        let mut sent = 0;
        for record in fresh {
            let line = match codec::encode(record) {
                Ok(line) => line,
                Err(e) => {
                    // Unsendable forever; step over it so later ids still flow
                    error!("Dropping command {}: {}", record.id, e);
                    state.record_dispatch(record.id);
                    continue;
                }
            };
            self.sink.send_line(line).await?;
            state.record_dispatch(record.id);
            sent += 1;
            debug!("Dispatched command {}: {}", record.id, record.command);
        }

        info!(
            "Dispatched {} command(s) via {}, commandAck now {:?}",
            sent,
            self.sink.name(),
            state.command_ack
        );
        Ok(sent)
    }

    /// Send the shutdown sentinel if an executor is running, then let go
    /// of it so later commands reach a fresh executor.
    ///
    /// Returns whether a sentinel was sent.
    pub async fn terminate_executor(&mut self) -> Result<bool, ChannelError> {
        if !self.sink.attach().await? {
            debug!("No executor to terminate");
            return Ok(false);
        }

        let line = codec::encode(&CommandRecord::sentinel())?;
        self.sink.send_line(line).await?;
        self.sink.retire().await?;

        info!("Sent exit sentinel to executor");
        Ok(true)
    }
}
