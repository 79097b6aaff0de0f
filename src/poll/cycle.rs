//! Poll cycle: build the report, exchange it, parse the answer

use tracing::debug;
use wibed_shared::{protocol, ServerRequest, ServerResponse};

use super::client::{Controller, PollError};
use crate::node::NodeState;
use crate::results::ResultStore;

/// Performs the request/response half of a tick
pub struct PollCycle<'a> {
    controller: &'a dyn Controller,
    results: &'a ResultStore,
}

impl<'a> PollCycle<'a> {
    pub fn new(controller: &'a dyn Controller, results: &'a ResultStore) -> Self {
        Self {
            controller,
            results,
        }
    }

    /// Build the report for the current state
    pub async fn build_request(&self, state: &NodeState) -> Result<ServerRequest, PollError> {
        let pending = if state.reports_results() {
            self.results.list_pending(state.result_ack).await?
        } else {
            Vec::new()
        };
        Ok(state.to_request(pending))
    }

    /// Send the report and parse the controller's answer.
    ///
    /// Nothing is mutated here; the caller decides what a failure means.
    pub async fn run(&self, state: &NodeState) -> Result<ServerResponse, PollError> {
        let request = self.build_request(state).await?;
        debug!(
            "Reporting status {} with {} result(s)",
            request.status,
            request.results.as_ref().map_or(0, Vec::len)
        );

        let body = self.controller.exchange(&state.node_id, &request).await?;
        Ok(protocol::parse_response(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wibed_shared::{result_files, NodeStatus};

    use crate::testutil::{MockController, Reply};

    fn write_result(root: &std::path::Path, id: i64, complete: bool) {
        let dir = root.join(id.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(result_files::STDOUT), format!("out{}", id)).unwrap();
        std::fs::write(dir.join(result_files::STDERR), "").unwrap();
        if complete {
            std::fs::write(dir.join(result_files::EXIT_CODE), "0").unwrap();
        }
    }

    #[tokio::test]
    async fn test_report_includes_exactly_pending_results() {
        let dir = tempfile::tempdir().unwrap();
        for id in [3, 4, 5] {
            write_result(dir.path(), id, true);
        }
        write_result(dir.path(), 6, false);
        let results = ResultStore::new(dir.path());
        let controller = MockController::body("{}");
        let cycle = PollCycle::new(&controller, &results);

        let mut state = NodeState::new("n");
        state.status = NodeStatus::Running;
        state.command_ack = Some(6);
        state.result_ack = Some(3);

        let request = serde_json::to_value(cycle.build_request(&state).await.unwrap()).unwrap();
        assert_eq!(
            request,
            json!({
                "status": 4,
                "commandAck": 6,
                "results": [
                    {"id": 4, "exitCode": 0, "stdout": "out4", "stderr": ""},
                    {"id": 5, "exitCode": 0, "stdout": "out5", "stderr": ""}
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_preparing_reports_status_only() {
        let dir = tempfile::tempdir().unwrap();
        write_result(dir.path(), 1, true);
        let results = ResultStore::new(dir.path());
        let controller = MockController::body("{}");
        let cycle = PollCycle::new(&controller, &results);

        let mut state = NodeState::new("n");
        state.status = NodeStatus::Preparing;
        state.command_ack = Some(1);

        let request = serde_json::to_value(cycle.build_request(&state).await.unwrap()).unwrap();
        assert_eq!(request, json!({"status": 2}));
    }

    #[tokio::test]
    async fn test_run_parses_response() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultStore::new(dir.path());
        let controller = MockController::body(r#"{"commands": {"6": "ls /tmp"}}"#);
        let cycle = PollCycle::new(&controller, &results);

        let mut state = NodeState::new("n");
        state.status = NodeStatus::Idle;
        let response = cycle.run(&state).await.unwrap();
        assert_eq!(response.command_records().len(), 1);
        assert_eq!(controller.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_classifies_failures() {
        let dir = tempfile::tempdir().unwrap();
        let results = ResultStore::new(dir.path());
        let state = NodeState::new("n");

        let unreachable = MockController::new(Reply::Unreachable);
        let err = PollCycle::new(&unreachable, &results).run(&state).await.unwrap_err();
        assert!(err.is_transport());

        let garbage = MockController::body("<html>");
        let err = PollCycle::new(&garbage, &results).run(&state).await.unwrap_err();
        assert!(matches!(err, PollError::Response(_)));
        assert!(!err.is_transport());
    }
}
