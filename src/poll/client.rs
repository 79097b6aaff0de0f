//! HTTP client for the controller's node API

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use wibed_shared::{ProtocolError, ServerRequest};

/// Errors that can end a poll cycle
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Controller unreachable: {0}")]
    Unreachable(String),

    #[error("Controller answered with HTTP status {0}")]
    Status(u16),

    #[error("Invalid controller response: {0}")]
    Response(#[from] ProtocolError),

    #[error("Failed to read results: {0}")]
    Results(#[from] std::io::Error),
}

impl PollError {
    /// Transport failures are retried on the next tick without fuss
    pub fn is_transport(&self) -> bool {
        matches!(self, PollError::Unreachable(_) | PollError::Status(_))
    }
}

/// Something that accepts a status report and answers with a raw body
#[async_trait]
pub trait Controller: Send + Sync {
    async fn exchange(&self, node_id: &str, request: &ServerRequest) -> Result<Vec<u8>, PollError>;
}

/// Controller reached over HTTP
#[derive(Clone)]
pub struct HttpController {
    api_url: String,
    client: reqwest::Client,
}

impl HttpController {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: api_url.into(),
            client,
        })
    }

    /// Endpoint for a node
    pub fn endpoint(&self, node_id: &str) -> String {
        format!(
            "{}/api/wibednode/{}",
            self.api_url.trim_end_matches('/'),
            node_id
        )
    }
}

#[async_trait]
impl Controller for HttpController {
    async fn exchange(&self, node_id: &str, request: &ServerRequest) -> Result<Vec<u8>, PollError> {
        let url = self.endpoint(node_id);
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| PollError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(PollError::Status(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| PollError::Unreachable(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wibed_shared::NodeStatus;

    use crate::testutil::serve_once;

    #[test]
    fn test_endpoint() {
        let controller = HttpController::new("http://ctl:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(controller.endpoint("node-3"), "http://ctl:5000/api/wibednode/node-3");
    }

    #[tokio::test]
    async fn test_posts_json_report() {
        let (base, request) = serve_once("200 OK", r#"{"resultAck": 1}"#).await;
        let controller = HttpController::new(base, Duration::from_secs(5)).unwrap();

        let body = controller
            .exchange("node-3", &ServerRequest::status_only(NodeStatus::Ready))
            .await
            .unwrap();
        assert_eq!(body, br#"{"resultAck": 1}"#);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /api/wibednode/node-3 "));
        assert!(raw.ends_with(r#"{"status":3}"#));
    }

    #[tokio::test]
    async fn test_non_200_is_transport_failure() {
        let (base, _) = serve_once("500 Internal Server Error", "oops").await;
        let controller = HttpController::new(base, Duration::from_secs(5)).unwrap();

        let err = controller
            .exchange("n", &ServerRequest::status_only(NodeStatus::Idle))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Status(500)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let controller = HttpController::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        let err = controller
            .exchange("n", &ServerRequest::status_only(NodeStatus::Idle))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Unreachable(_)));
        assert!(err.is_transport());
    }
}
