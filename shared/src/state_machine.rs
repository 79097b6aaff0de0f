//! Node Lifecycle State Machine
//!
//! Defines valid status transitions and which directive a controller
//! response authorizes from each status.

use crate::{ExperimentAction, NodeStatus, ServerResponse, UpgradeOrder};

/// Events that can trigger status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Controller answered the first report
    Registered,
    /// Firmware downloaded and handed to the installer
    UpgradeStarted,
    /// Overlay download begins
    PrepareStarted,
    /// Overlay downloaded and installed
    PrepareComplete,
    /// Experiment started
    RunStarted,
    /// Experiment finished and cleaned up
    Finished,
    /// A download or install action failed
    ActionFailed,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and status changed
    Success(NodeStatus),
    /// Transition was invalid from current status
    Invalid {
        from: NodeStatus,
        event: LifecycleEvent,
    },
}

/// What a controller response asks the node to do this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Leave INIT, nothing else
    Register,
    /// Download and install firmware
    Upgrade(UpgradeOrder),
    /// Download and install an experiment overlay
    Prepare {
        experiment_id: String,
        overlay: String,
        hash: String,
    },
    /// Start the prepared experiment
    Start,
    /// Tear down the running experiment
    Finish,
    /// Forward new commands to the executor
    Dispatch,
    /// Nothing to do
    Hold,
}

impl Directive {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Directive::Register => "register",
            Directive::Upgrade(_) => "upgrade",
            Directive::Prepare { .. } => "prepare",
            Directive::Start => "start",
            Directive::Finish => "finish",
            Directive::Dispatch => "dispatch",
            Directive::Hold => "hold",
        }
    }
}

/// Pick the directive a response authorizes from the given status.
///
/// At most one lifecycle directive fires per tick. Commands are only
/// dispatched when no lifecycle row applies.
pub fn decide(status: NodeStatus, response: &ServerResponse) -> Directive {
    use NodeStatus::*;

    let action = response.experiment_action();

    match status {
        Init => Directive::Register,

        // ERROR accepts the same orders as IDLE so failed downloads are retried
        Idle | Error => {
            if let Some(upgrade) = &response.upgrade {
                return Directive::Upgrade(upgrade.clone());
            }
            match (action, &response.experiment) {
                (Some(ExperimentAction::Prepare), Some(experiment)) => Directive::Prepare {
                    experiment_id: experiment.id.clone(),
                    overlay: experiment.overlay.clone().unwrap_or_default(),
                    hash: experiment.hash.clone().unwrap_or_default(),
                },
                (Some(ExperimentAction::Finish), _) if status == Error => Directive::Finish,
                _ => Directive::Dispatch,
            }
        }

        Preparing | Ready | Running if action == Some(ExperimentAction::Finish) => {
            Directive::Finish
        }

        Ready if action == Some(ExperimentAction::Run) => Directive::Start,

        Running => Directive::Dispatch,

        Preparing | Ready | Upgrading => Directive::Hold,
    }
}

/// Tracks the node status through the transitions of one tick
#[derive(Debug)]
pub struct LifecycleMachine {
    current: NodeStatus,
}

impl LifecycleMachine {
    /// Start from a persisted status
    pub fn new(status: NodeStatus) -> Self {
        Self { current: status }
    }

    /// Get current status
    pub fn status(&self) -> NodeStatus {
        self.current
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        match self.get_next_status(event) {
            Some(status) => {
                self.current = status;
                TransitionResult::Success(status)
            }
            None => TransitionResult::Invalid {
                from: self.current,
                event,
            },
        }
    }

    /// Get the next status for a given event, if the transition is valid
    fn get_next_status(&self, event: LifecycleEvent) -> Option<NodeStatus> {
        use LifecycleEvent::*;
        use NodeStatus::*;

        match (self.current, event) {
            (Init, Registered) => Some(Idle),

            (Idle | Error, UpgradeStarted) => Some(Upgrading),
            (Idle | Error, PrepareStarted) => Some(Preparing),
            (Preparing, PrepareComplete) => Some(Ready),
            (Ready, RunStarted) => Some(Running),

            (Preparing | Ready | Running | Error, Finished) => Some(Idle),

            (Idle | Preparing | Error, ActionFailed) => Some(Error),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_response;

    fn response(body: &str) -> ServerResponse {
        parse_response(body.as_bytes()).unwrap()
    }

    #[test]
    fn test_init_registers_regardless_of_content() {
        let busy = response(
            r#"{"upgrade":{"version":"2.0","hash":"h"},"commands":{"1":"ls"}}"#,
        );
        assert_eq!(decide(NodeStatus::Init, &busy), Directive::Register);
        assert_eq!(decide(NodeStatus::Init, &response("{}")), Directive::Register);
    }

    #[test]
    fn test_upgrade_takes_priority_over_prepare() {
        let both = response(
            r#"{"upgrade":{"version":"2.0","hash":"h","utime":5},
                "experiment":{"action":"PREPARE","id":"1","overlay":"o"}}"#,
        );
        assert!(matches!(decide(NodeStatus::Idle, &both), Directive::Upgrade(_)));
    }

    #[test]
    fn test_prepare_from_idle() {
        let prepare = response(
            r#"{"experiment":{"action":"PREPARE","id":"42","overlay":"ov7","hash":"abc"}}"#,
        );
        assert_eq!(
            decide(NodeStatus::Idle, &prepare),
            Directive::Prepare {
                experiment_id: "42".into(),
                overlay: "ov7".into(),
                hash: "abc".into(),
            }
        );
        assert_eq!(decide(NodeStatus::Running, &prepare), Directive::Dispatch);
        assert_eq!(decide(NodeStatus::Ready, &prepare), Directive::Hold);
    }

    #[test]
    fn test_run_only_from_ready() {
        let run = response(r#"{"experiment":{"action":"RUN","id":"42"}}"#);
        assert_eq!(decide(NodeStatus::Ready, &run), Directive::Start);
        assert_eq!(decide(NodeStatus::Idle, &run), Directive::Dispatch);
        assert_eq!(decide(NodeStatus::Preparing, &run), Directive::Hold);
    }

    #[test]
    fn test_finish_from_experiment_states() {
        let finish = response(r#"{"experiment":{"action":"FINISH","id":"42"}}"#);
        for status in [
            NodeStatus::Preparing,
            NodeStatus::Ready,
            NodeStatus::Running,
            NodeStatus::Error,
        ] {
            assert_eq!(decide(status, &finish), Directive::Finish);
        }
        assert_eq!(decide(NodeStatus::Idle, &finish), Directive::Dispatch);
        assert_eq!(decide(NodeStatus::Upgrading, &finish), Directive::Hold);
    }

    #[test]
    fn test_upgrading_is_reserved() {
        let upgrade = response(r#"{"upgrade":{"version":"3.0"},"commands":{"1":"ls"}}"#);
        assert_eq!(decide(NodeStatus::Upgrading, &upgrade), Directive::Hold);
    }

    #[test]
    fn test_normal_experiment_flow() {
        let mut fsm = LifecycleMachine::new(NodeStatus::Init);

        let result = fsm.process_event(LifecycleEvent::Registered);
        assert_eq!(result, TransitionResult::Success(NodeStatus::Idle));

        let result = fsm.process_event(LifecycleEvent::PrepareStarted);
        assert_eq!(result, TransitionResult::Success(NodeStatus::Preparing));

        let result = fsm.process_event(LifecycleEvent::PrepareComplete);
        assert_eq!(result, TransitionResult::Success(NodeStatus::Ready));

        let result = fsm.process_event(LifecycleEvent::RunStarted);
        assert_eq!(result, TransitionResult::Success(NodeStatus::Running));

        let result = fsm.process_event(LifecycleEvent::Finished);
        assert_eq!(result, TransitionResult::Success(NodeStatus::Idle));
    }

    #[test]
    fn test_failed_prepare_goes_to_error() {
        let mut fsm = LifecycleMachine::new(NodeStatus::Idle);
        fsm.process_event(LifecycleEvent::PrepareStarted);
        let result = fsm.process_event(LifecycleEvent::ActionFailed);
        assert_eq!(result, TransitionResult::Success(NodeStatus::Error));
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = LifecycleMachine::new(NodeStatus::Idle);

        // Can't run without preparing first
        let result = fsm.process_event(LifecycleEvent::RunStarted);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.status(), NodeStatus::Idle);

        let mut fsm = LifecycleMachine::new(NodeStatus::Upgrading);
        let result = fsm.process_event(LifecycleEvent::Finished);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }
}
