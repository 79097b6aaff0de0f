//! Node state loaded at the start of a tick and persisted at its end

use tracing::warn;
use wibed_shared::{keys, NodeStatus, ResultRecord, ServerRequest};

use crate::config::{ConfigError, ConfigStore};

/// Everything the agent remembers between ticks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub status: NodeStatus,
    pub node_id: String,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub experiment_id: Option<String>,
    /// Highest command id written to the executor
    pub command_ack: Option<i64>,
    /// Highest result id the controller confirmed
    pub result_ack: Option<i64>,
}

impl NodeState {
    /// Fresh state for a node that has never talked to the controller
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Init,
            node_id: node_id.into(),
            model: None,
            firmware_version: None,
            experiment_id: None,
            command_ack: None,
            result_ack: None,
        }
    }

    /// Load the state from the config store.
    ///
    /// A missing node id is fatal. A missing status means INIT.
    pub async fn load(store: &dyn ConfigStore) -> Result<Self, ConfigError> {
        let node_id = store.require(keys::NODE_ID).await?;

        let status = match store.get(keys::STATUS).await? {
            Some(raw) => parse_status(&raw)?,
            None => NodeStatus::Init,
        };

        let mut state = Self {
            status,
            node_id,
            model: non_empty(store.get(keys::MODEL).await?),
            firmware_version: non_empty(store.get(keys::VERSION).await?),
            experiment_id: non_empty(store.get(keys::EXPERIMENT_ID).await?),
            command_ack: parse_ack(keys::COMMAND_ACK, store.get(keys::COMMAND_ACK).await?)?,
            result_ack: parse_ack(keys::RESULT_ACK, store.get(keys::RESULT_ACK).await?)?,
        };

        if state.result_ack.is_some() && !state.acks_consistent() {
            warn!(
                "Persisted resultAck {:?} exceeds commandAck {:?}, clamping",
                state.result_ack, state.command_ack
            );
            state.result_ack = state.command_ack;
        }

        Ok(state)
    }

    /// Persist the mutable part of the state and commit it
    pub async fn persist(&self, store: &dyn ConfigStore) -> Result<(), ConfigError> {
        store
            .set(keys::STATUS, &self.status.code().to_string())
            .await?;

        if let Some(ack) = self.command_ack {
            store.set(keys::COMMAND_ACK, &ack.to_string()).await?;
        }
        if let Some(ack) = self.result_ack {
            store.set(keys::RESULT_ACK, &ack.to_string()).await?;
        }
        if let Some(version) = &self.firmware_version {
            store.set(keys::VERSION, version).await?;
        }
        match &self.experiment_id {
            Some(id) => store.set(keys::EXPERIMENT_ID, id).await?,
            None => store.unset(keys::EXPERIMENT_ID).await?,
        }

        store.commit().await
    }

    /// Whether this status report carries results
    pub fn reports_results(&self) -> bool {
        self.status.accepts_commands() && self.command_ack.is_some()
    }

    /// Build the report for this tick from the pending results
    pub fn to_request(&self, pending: Vec<ResultRecord>) -> ServerRequest {
        match (self.status, self.command_ack) {
            (NodeStatus::Init, _) => ServerRequest::init(
                self.model.clone().unwrap_or_default(),
                self.firmware_version.clone().unwrap_or_default(),
            ),
            (status, Some(ack)) if status.accepts_commands() => {
                ServerRequest::report(status, ack, pending)
            }
            (status, _) => ServerRequest::status_only(status),
        }
    }

    /// Record a result acknowledgement from the controller.
    ///
    /// The acknowledgement only moves forward and never passes `command_ack`.
    pub fn acknowledge_results(&mut self, ack: i64) {
        let Some(command_ack) = self.command_ack else {
            warn!("Ignoring resultAck {}: no command dispatched yet", ack);
            return;
        };

        let clamped = if ack > command_ack {
            warn!(
                "Controller acknowledged result {} beyond commandAck {}, clamping",
                ack, command_ack
            );
            command_ack
        } else {
            ack
        };

        if self.result_ack.map_or(true, |current| clamped > current) {
            self.result_ack = Some(clamped);
        }
    }

    /// Record a command written to the executor
    pub fn record_dispatch(&mut self, id: i64) {
        if self.command_ack.map_or(true, |current| id > current) {
            self.command_ack = Some(id);
        }
    }

    /// `resultAck <= commandAck`, treating unset acks as nothing acknowledged
    pub fn acks_consistent(&self) -> bool {
        match (self.result_ack, self.command_ack) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(result), Some(command)) => result <= command,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_status(raw: &str) -> Result<NodeStatus, ConfigError> {
    raw.trim()
        .parse::<u8>()
        .ok()
        .and_then(|code| NodeStatus::try_from(code).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            key: keys::STATUS.into(),
            value: raw.into(),
        })
}

fn parse_ack(key: &str, raw: Option<String>) -> Result<Option<i64>, ConfigError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                value: value.into(),
            }),
    }
}
