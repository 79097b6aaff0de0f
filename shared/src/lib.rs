//! WiBed Shared Protocol Types
//!
//! This crate provides the types shared between the node agent and the
//! command executor: the controller wire protocol, the pipe line codec and
//! the node lifecycle table.

pub mod codec;
pub mod protocol;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export commonly used types at crate root
pub use protocol::{
    CommandRecord, ExperimentAction, ExperimentOrder, ProtocolError, ResultRecord, ServerRequest,
    ServerResponse, UpgradeOrder,
};

/// Lifecycle status of a node, reported to the controller as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NodeStatus {
    Init,
    Idle,
    Preparing,
    Ready,
    Running,
    Upgrading,
    Error,
}

impl NodeStatus {
    /// Integer code used on the wire and in the config store
    pub fn code(self) -> u8 {
        match self {
            NodeStatus::Init => 0,
            NodeStatus::Idle => 1,
            NodeStatus::Preparing => 2,
            NodeStatus::Ready => 3,
            NodeStatus::Running => 4,
            NodeStatus::Upgrading => 5,
            NodeStatus::Error => 6,
        }
    }

    /// Statuses in which the node reports results and accepts commands
    pub fn accepts_commands(self) -> bool {
        matches!(self, NodeStatus::Idle | NodeStatus::Running | NodeStatus::Error)
    }
}

impl From<NodeStatus> for u8 {
    fn from(status: NodeStatus) -> u8 {
        status.code()
    }
}

impl TryFrom<u8> for NodeStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(NodeStatus::Init),
            1 => Ok(NodeStatus::Idle),
            2 => Ok(NodeStatus::Preparing),
            3 => Ok(NodeStatus::Ready),
            4 => Ok(NodeStatus::Running),
            5 => Ok(NodeStatus::Upgrading),
            6 => Ok(NodeStatus::Error),
            other => Err(format!("unknown node status code {}", other)),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Init => "INIT",
            NodeStatus::Idle => "IDLE",
            NodeStatus::Preparing => "PREPARING",
            NodeStatus::Ready => "READY",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Upgrading => "UPGRADING",
            NodeStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Persisted configuration keys
pub mod keys {
    /// Controller base URL (mandatory)
    pub const API_URL: &str = "general.api_url";

    /// Node identifier assigned out of band (mandatory)
    pub const NODE_ID: &str = "general.node_id";

    /// Current lifecycle status code
    pub const STATUS: &str = "general.status";

    /// Highest command id written to the executor
    pub const COMMAND_ACK: &str = "general.commandAck";

    /// Highest result id the controller has confirmed
    pub const RESULT_ACK: &str = "general.resultAck";

    /// Hardware model, reported while INIT
    pub const MODEL: &str = "upgrade.model";

    /// Firmware version, reported while INIT and updated by upgrades
    pub const VERSION: &str = "upgrade.version";

    /// Identifier of the prepared experiment
    pub const EXPERIMENT_ID: &str = "experiment.exp_id";
}

/// Result directory layout shared by the executor and the agent.
///
/// Each command gets `<results>/<id>/` holding these three files; the exit
/// code is written last and marks the record complete.
pub mod result_files {
    pub const EXIT_CODE: &str = "exitCode";
    pub const STDOUT: &str = "stdout";
    pub const STDERR: &str = "stderr";
}

/// Fixed protocol parameters
pub mod limits {
    /// Command id reserved for the executor shutdown sentinel
    pub const SENTINEL_ID: i64 = -1;

    /// Command string carried by the shutdown sentinel
    pub const SENTINEL_COMMAND: &str = "exit";

    /// Longest pipe line accepted by the decoder
    pub const MAX_LINE_LENGTH: usize = 64 * 1024;
}
