//! One agent tick: load, report, apply, persist

use thiserror::Error;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactFetcher, InstallHook};
use crate::command::{ChannelError, CommandChannel};
use crate::config::{ConfigError, ConfigStore};
use crate::lifecycle::{Applied, HandlerContext, StateMachine};
use crate::node::NodeState;
use crate::poll::{Controller, PollCycle, PollError};
use crate::results::ResultStore;

/// Failures that end a tick with a non-zero exit status
#[derive(Error, Debug)]
pub enum TickError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Controller response rejected: {0}")]
    Response(PollError),

    #[error("Command dispatch failed: {0}")]
    Dispatch(#[from] ChannelError),

    #[error("Failed to persist node state: {0}")]
    Persist(ConfigError),
}

impl TickError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            TickError::Config(_) => 1,
            TickError::Response(_) => 2,
            TickError::Dispatch(_) | TickError::Persist(_) => 3,
        }
    }
}

/// How a tick that did not fail ended
#[derive(Debug)]
pub enum TickOutcome {
    /// Controller could not be reached; nothing changed
    Unreachable(PollError),
    /// Response applied and state persisted
    Completed(Applied),
}

/// Everything a tick needs
pub struct Agent {
    store: Box<dyn ConfigStore>,
    controller: Box<dyn Controller>,
    fetcher: Box<dyn ArtifactFetcher>,
    results: ResultStore,
    channel: CommandChannel,
    firmware_hook: InstallHook,
    overlay_hook: InstallHook,
}

impl Agent {
    pub fn new(
        store: Box<dyn ConfigStore>,
        controller: Box<dyn Controller>,
        fetcher: Box<dyn ArtifactFetcher>,
        results: ResultStore,
        channel: CommandChannel,
    ) -> Self {
        Self {
            store,
            controller,
            fetcher,
            results,
            channel,
            firmware_hook: InstallHook::disabled("firmware"),
            overlay_hook: InstallHook::disabled("overlay"),
        }
    }

    /// Install hooks run after artifacts are downloaded
    pub fn with_hooks(mut self, firmware: InstallHook, overlay: InstallHook) -> Self {
        self.firmware_hook = firmware;
        self.overlay_hook = overlay;
        self
    }

    /// Run one tick.
    ///
    /// State is only written back once a valid response was received.
    pub async fn tick(&mut self) -> Result<TickOutcome, TickError> {
        let mut state = NodeState::load(self.store.as_ref()).await?;
        info!(
            "Node {} in status {} (commandAck {:?}, resultAck {:?})",
            state.node_id, state.status, state.command_ack, state.result_ack
        );

        let response = match PollCycle::new(self.controller.as_ref(), &self.results)
            .run(&state)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_transport() => {
                warn!("{}; retrying next tick", e);
                return Ok(TickOutcome::Unreachable(e));
            }
            Err(e) => return Err(TickError::Response(e)),
        };

        let ctx = HandlerContext {
            fetcher: self.fetcher.as_ref(),
            results: &self.results,
            firmware_hook: &self.firmware_hook,
            overlay_hook: &self.overlay_hook,
        };
        let applied = StateMachine::new(ctx, &mut self.channel)
            .apply(&mut state, &response)
            .await;

        if let Err(e) = state.persist(self.store.as_ref()).await {
            error!("Could not persist state: {}", e);
            return Err(TickError::Persist(e));
        }

        let applied = applied?;
        info!(
            "Tick done: {} ({} -> {}), {} command(s) dispatched",
            applied.directive, applied.from, applied.to, applied.dispatched
        );
        Ok(TickOutcome::Completed(applied))
    }
}
