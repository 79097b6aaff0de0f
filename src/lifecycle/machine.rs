//! Drives one lifecycle step per controller response

use tracing::{debug, error, info, warn};
use wibed_shared::state_machine::{decide, Directive, LifecycleEvent, LifecycleMachine, TransitionResult};
use wibed_shared::{NodeStatus, ServerResponse};

use super::handlers::{self, ActionResult, HandlerContext};
use crate::command::{ChannelError, CommandChannel};
use crate::node::NodeState;

/// What one call to [`StateMachine::apply`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub directive: &'static str,
    pub from: NodeStatus,
    pub to: NodeStatus,
    /// Commands written to the executor
    pub dispatched: usize,
}

/// Applies controller responses to the node state
pub struct StateMachine<'a> {
    ctx: HandlerContext<'a>,
    channel: &'a mut CommandChannel,
}

impl<'a> StateMachine<'a> {
    pub fn new(ctx: HandlerContext<'a>, channel: &'a mut CommandChannel) -> Self {
        Self { ctx, channel }
    }

    /// Apply a parsed response to `state`.
    ///
    /// `state` is updated in place even when an error is returned, so the
    /// caller must persist it either way: a dispatch that fails part way
    /// still advances `command_ack` for the lines already written.
    pub async fn apply(
        &mut self,
        state: &mut NodeState,
        response: &ServerResponse,
    ) -> Result<Applied, ChannelError> {
        let from = state.status;
        let directive = decide(from, response);
        debug!("Status {} -> directive {}", from, directive.name());

        // The INIT report carries no results, so nothing can be acknowledged
        if from != NodeStatus::Init {
            if let Some(ack) = response.result_ack() {
                state.acknowledge_results(ack);
            }
        }

        let mut fsm = LifecycleMachine::new(from);
        let mut dispatched = 0;

        match &directive {
            Directive::Register => {
                step(&mut fsm, LifecycleEvent::Registered);
            }

            Directive::Upgrade(order) => {
                match handlers::handle_upgrade(&self.ctx, order).await {
                    ActionResult::Completed { message } => {
                        info!("{}", message);
                        state.firmware_version = Some(order.version.clone());
                        step(&mut fsm, LifecycleEvent::UpgradeStarted);
                    }
                    ActionResult::Failed { message } => {
                        error!("{}", message);
                        step(&mut fsm, LifecycleEvent::ActionFailed);
                    }
                }
            }

            Directive::Prepare {
                experiment_id,
                overlay,
                hash,
            } => {
                step(&mut fsm, LifecycleEvent::PrepareStarted);
                match handlers::handle_prepare(&self.ctx, experiment_id, overlay, hash).await {
                    ActionResult::Completed { message } => {
                        info!("{}", message);
                        state.experiment_id = Some(experiment_id.clone());
                        step(&mut fsm, LifecycleEvent::PrepareComplete);
                    }
                    ActionResult::Failed { message } => {
                        error!("{}", message);
                        step(&mut fsm, LifecycleEvent::ActionFailed);
                    }
                }
            }

            Directive::Start => {
                if let ActionResult::Completed { message } =
                    handlers::handle_start(state.experiment_id.as_deref()).await
                {
                    info!("{}", message);
                }
                step(&mut fsm, LifecycleEvent::RunStarted);
            }

            Directive::Finish => {
                match handlers::handle_finish(&self.ctx, self.channel).await {
                    ActionResult::Completed { message } => info!("{}", message),
                    ActionResult::Failed { message } => warn!("{}", message),
                }
                state.experiment_id = None;
                step(&mut fsm, LifecycleEvent::Finished);
            }

            Directive::Dispatch => {
                let commands = response.command_records();
                if !commands.is_empty() {
                    dispatched = self.channel.dispatch(&commands, state).await?;
                }
            }

            Directive::Hold => {
                debug!("Nothing to do in {}", from);
            }
        }

        state.status = fsm.status();
        Ok(Applied {
            directive: directive.name(),
            from,
            to: state.status,
            dispatched,
        })
    }
}

fn step(fsm: &mut LifecycleMachine, event: LifecycleEvent) {
    match fsm.process_event(event) {
        TransitionResult::Success(status) => info!("Status now {} after {:?}", status, event),
        TransitionResult::Invalid { from, event } => {
            warn!("Ignoring {:?} in status {}", event, from);
        }
    }
}
