//! Fakes shared by the unit tests

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wibed_shared::ServerRequest;

use crate::artifact::{ArtifactFetcher, ArtifactKind, FetchError};
use crate::poll::{Controller, PollError};

/// Serve one HTTP response on a local port.
///
/// Returns the base URL and a handle yielding the raw request.
pub async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}", addr), handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

/// What the fake controller answers
#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Status(u16),
    Unreachable,
}

/// Controller that records requests and plays back a fixed reply
pub struct MockController {
    reply: Reply,
    pub requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockController {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn body(body: &str) -> Self {
        Self::new(Reply::Body(body.to_string()))
    }
}

#[async_trait]
impl Controller for MockController {
    async fn exchange(&self, _node_id: &str, request: &ServerRequest) -> Result<Vec<u8>, PollError> {
        self.requests
            .lock()
            .unwrap()
            .push(serde_json::to_value(request).unwrap());
        match &self.reply {
            Reply::Body(body) => Ok(body.clone().into_bytes()),
            Reply::Status(code) => Err(PollError::Status(*code)),
            Reply::Unreachable => Err(PollError::Unreachable("connection refused".into())),
        }
    }
}

/// Fetcher that never touches the network
#[derive(Clone, Default)]
pub struct FakeFetcher {
    pub fail: bool,
    pub fetched: Arc<Mutex<Vec<(ArtifactKind, String, String)>>>,
    pub discarded: Arc<Mutex<Vec<ArtifactKind>>>,
}

impl FakeFetcher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, kind: ArtifactKind, name: &str, hash: &str) -> Result<PathBuf, FetchError> {
        self.fetched
            .lock()
            .unwrap()
            .push((kind, name.to_string(), hash.to_string()));
        if self.fail {
            return Err(FetchError::Status(404));
        }
        Ok(PathBuf::from("/tmp/fake").join(name))
    }

    async fn discard(&self, kind: ArtifactKind) -> Result<(), FetchError> {
        self.discarded.lock().unwrap().push(kind);
        Ok(())
    }
}
