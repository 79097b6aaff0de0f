//! Controller wire protocol
//!
//! The node posts a [`ServerRequest`] to `/api/wibednode/<node id>` and the
//! controller answers with a [`ServerResponse`]. Every field of the response
//! is optional; a response is only accepted once [`parse_response`] has
//! checked it against the schema below.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{limits, NodeStatus};

/// Errors produced while interpreting a controller response
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Controller reported errors: {0}")]
    Rejected(String),

    #[error("Missing field {0} in response")]
    MissingField(&'static str),
}

/// A command addressed to the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub id: i64,
    pub command: String,
}

impl CommandRecord {
    pub fn new(id: i64, command: impl Into<String>) -> Self {
        Self {
            id,
            command: command.into(),
        }
    }

    /// The record that tells the executor to shut down
    pub fn sentinel() -> Self {
        Self::new(limits::SENTINEL_ID, limits::SENTINEL_COMMAND)
    }

    pub fn is_sentinel(&self) -> bool {
        self.id == limits::SENTINEL_ID && self.command == limits::SENTINEL_COMMAND
    }
}

/// Outcome of one executed command, as reported to the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: i64,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Status report sent on every tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRequest {
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ResultRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_ack: Option<i64>,
}

impl ServerRequest {
    /// Report carrying nothing but the status
    pub fn status_only(status: NodeStatus) -> Self {
        Self {
            status,
            model: None,
            version: None,
            results: None,
            command_ack: None,
        }
    }

    /// First report of a freshly installed node
    pub fn init(model: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            version: Some(version.into()),
            ..Self::status_only(NodeStatus::Init)
        }
    }

    /// Report carrying pending results and the command acknowledgement
    pub fn report(status: NodeStatus, command_ack: i64, results: Vec<ResultRecord>) -> Self {
        Self {
            results: Some(results),
            command_ack: Some(command_ack),
            ..Self::status_only(status)
        }
    }
}

/// Lifecycle action requested for an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExperimentAction {
    Prepare,
    Run,
    Finish,
}

/// Firmware upgrade order
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpgradeOrder {
    #[serde(deserialize_with = "text_or_number")]
    pub version: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub utime: Option<i64>,
}

/// Experiment order
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentOrder {
    #[serde(deserialize_with = "text_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_text_or_number")]
    pub overlay: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    pub action: ExperimentAction,
    #[serde(default)]
    pub commands: Option<BTreeMap<i64, String>>,
    #[serde(default)]
    pub result_ack: Option<i64>,
}

/// Parsed controller response
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    #[serde(default)]
    pub errors: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub upgrade: Option<UpgradeOrder>,
    #[serde(default)]
    pub experiment: Option<ExperimentOrder>,
    #[serde(default)]
    pub commands: Option<BTreeMap<i64, String>>,
    #[serde(default)]
    pub result_ack: Option<i64>,
}

impl ServerResponse {
    /// Action requested for the current experiment, if any
    pub fn experiment_action(&self) -> Option<ExperimentAction> {
        self.experiment.as_ref().map(|e| e.action)
    }

    /// All commands in the response, in ascending id order.
    ///
    /// Commands may be sent at top level or inside the experiment object.
    /// The top-level entry wins when both carry the same id.
    pub fn command_records(&self) -> Vec<CommandRecord> {
        let mut merged = BTreeMap::new();
        let nested = self.experiment.as_ref().and_then(|e| e.commands.as_ref());
        for map in [nested, self.commands.as_ref()].into_iter().flatten() {
            for (id, command) in map {
                merged.insert(*id, command.clone());
            }
        }
        merged
            .into_iter()
            .map(|(id, command)| CommandRecord { id, command })
            .collect()
    }

    /// Highest result acknowledgement carried anywhere in the response
    pub fn result_ack(&self) -> Option<i64> {
        let nested = self.experiment.as_ref().and_then(|e| e.result_ack);
        match (self.result_ack, nested) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if let Some(errors) = self.errors.as_ref().filter(|e| !e.is_empty()) {
            let summary = errors
                .iter()
                .map(|(field, reason)| format!("{}: {}", field, reason))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ProtocolError::Rejected(summary));
        }

        if let Some(experiment) = &self.experiment {
            if experiment.action == ExperimentAction::Prepare && experiment.overlay.is_none() {
                return Err(ProtocolError::MissingField("experiment.overlay"));
            }
        }

        Ok(())
    }
}

/// Parse and validate a controller response body
pub fn parse_response(body: &[u8]) -> Result<ServerResponse, ProtocolError> {
    let response: ServerResponse = serde_json::from_slice(body)?;
    response.validate()?;
    Ok(response)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Number(i64),
}

impl From<TextOrNumber> for String {
    fn from(value: TextOrNumber) -> String {
        match value {
            TextOrNumber::Text(text) => text,
            TextOrNumber::Number(n) => n.to_string(),
        }
    }
}

// The controller is not consistent about quoting identifiers.
fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    TextOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_text_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<TextOrNumber>::deserialize(deserializer)?.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_init_request_shape() {
        let request = ServerRequest::init("nodeA", "1.0");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"status": 0, "model": "nodeA", "version": "1.0"}));
    }

    #[test]
    fn test_report_request_shape() {
        let results = vec![ResultRecord {
            id: 6,
            exit_code: 0,
            stdout: "a\n".into(),
            stderr: String::new(),
        }];
        let request = ServerRequest::report(NodeStatus::Running, 7, results);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "status": 4,
                "commandAck": 7,
                "results": [{"id": 6, "exitCode": 0, "stdout": "a\n", "stderr": ""}]
            })
        );
    }

    #[test]
    fn test_status_only_request() {
        let value = serde_json::to_value(ServerRequest::status_only(NodeStatus::Ready)).unwrap();
        assert_eq!(value, json!({"status": 3}));
    }

    #[test]
    fn test_parse_empty_response() {
        let response = parse_response(b"{}").unwrap();
        assert_eq!(response, ServerResponse::default());
        assert!(response.command_records().is_empty());
    }

    #[test]
    fn test_parse_prepare_order() {
        let body = br#"{"experiment":{"action":"PREPARE","id":"42","overlay":"ov7","hash":"abc"}}"#;
        let response = parse_response(body).unwrap();
        let experiment = response.experiment.unwrap();
        assert_eq!(experiment.action, ExperimentAction::Prepare);
        assert_eq!(experiment.id, "42");
        assert_eq!(experiment.overlay.as_deref(), Some("ov7"));
        assert_eq!(experiment.hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_numeric_identifiers() {
        let body = br#"{"experiment":{"action":"RUN","id":42},"upgrade":{"version":3,"hash":"h","utime":10}}"#;
        let response = parse_response(body).unwrap();
        assert_eq!(response.experiment.unwrap().id, "42");
        let upgrade = response.upgrade.unwrap();
        assert_eq!(upgrade.version, "3");
        assert_eq!(upgrade.utime, Some(10));
    }

    #[test]
    fn test_commands_are_merged_in_id_order() {
        let body = br#"{
            "commands": {"10": "echo ten", "7": "echo hi"},
            "experiment": {"action": "RUN", "id": "1", "commands": {"6": "ls /tmp", "7": "stale"}}
        }"#;
        let response = parse_response(body).unwrap();
        let ids: Vec<i64> = response.command_records().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![6, 7, 10]);
        assert_eq!(response.command_records()[1].command, "echo hi");
    }

    #[test]
    fn test_result_ack_takes_highest() {
        let body = br#"{"resultAck": 3, "experiment": {"action": "RUN", "id": "1", "resultAck": 5}}"#;
        assert_eq!(parse_response(body).unwrap().result_ack(), Some(5));
        assert_eq!(parse_response(br#"{"resultAck": 2}"#).unwrap().result_ack(), Some(2));
    }

    #[test]
    fn test_errors_reject_response() {
        let result = parse_response(br#"{"errors": {"node": "unknown node"}}"#);
        assert!(matches!(result, Err(ProtocolError::Rejected(_))));
        assert!(parse_response(br#"{"errors": {}}"#).is_ok());
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(parse_response(b"not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            parse_response(br#"{"commands": {"six": "ls"}}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_response(br#"{"experiment": {"action": "PAUSE", "id": "1"}}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_prepare_requires_overlay() {
        let result = parse_response(br#"{"experiment": {"action": "PREPARE", "id": "1"}}"#);
        assert!(matches!(result, Err(ProtocolError::MissingField("experiment.overlay"))));
    }

    #[test]
    fn test_sentinel_record() {
        let sentinel = CommandRecord::sentinel();
        assert!(sentinel.is_sentinel());
        assert!(!CommandRecord::new(-1, "ls").is_sentinel());
    }
}
