//! Artifact download with SHA-256 verification

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Kind of artifact the controller can order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Firmware,
    Overlay,
}

impl ArtifactKind {
    /// URL segment under `/static/`
    fn segment(self) -> &'static str {
        match self {
            ArtifactKind::Firmware => "firmwares",
            ArtifactKind::Overlay => "overlays",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Firmware => write!(f, "firmware"),
            ArtifactKind::Overlay => write!(f, "overlay"),
        }
    }
}

/// Errors that can occur while fetching an artifact
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Invalid artifact name {0:?}")]
    InvalidName(String),

    #[error("Download failed with HTTP status {0}")]
    Status(u16),

    #[error("Download failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FetchError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Source of firmware images and experiment overlays
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Download an artifact and return where it was stored
    async fn fetch(&self, kind: ArtifactKind, name: &str, hash: &str) -> Result<PathBuf, FetchError>;

    /// Remove every downloaded artifact of a kind
    async fn discard(&self, kind: ArtifactKind) -> Result<(), FetchError>;
}

/// Compare a digest against the expected hex string.
///
/// An empty expectation skips the check.
pub fn verify_digest(expected: &str, digest: &[u8]) -> Result<(), FetchError> {
    let expected = expected.trim();
    if expected.is_empty() {
        return Ok(());
    }
    let actual = hex::encode(digest);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(FetchError::HashMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

fn validate_name(name: &str) -> Result<(), FetchError> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\0');
    if bad {
        Err(FetchError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// Fetches artifacts from the controller's static file area
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    firmware_dir: PathBuf,
    overlay_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(
        base_url: impl Into<String>,
        firmware_dir: impl Into<PathBuf>,
        overlay_dir: impl Into<PathBuf>,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            firmware_dir: firmware_dir.into(),
            overlay_dir: overlay_dir.into(),
        })
    }

    fn dir(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Firmware => &self.firmware_dir,
            ArtifactKind::Overlay => &self.overlay_dir,
        }
    }

    /// Download location for an artifact
    pub fn url(&self, kind: ArtifactKind, name: &str) -> String {
        format!(
            "{}/static/{}/{}",
            self.base_url.trim_end_matches('/'),
            kind.segment(),
            name
        )
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, kind: ArtifactKind, name: &str, hash: &str) -> Result<PathBuf, FetchError> {
        validate_name(name)?;
        let url = self.url(kind, name);
        info!("Downloading {} {} from {}", kind, name, url);

        let mut response = self.client.get(&url).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let dir = self.dir(kind);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FetchError::io(dir, e))?;

        let target = dir.join(name);
        let partial = dir.join(format!("{}.part", name));
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| FetchError::io(&partial, e))?;

        let mut hasher = Sha256::new();
        let mut size = 0usize;
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            size += chunk.len();
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(&partial, e))?;
        }
        file.flush().await.map_err(|e| FetchError::io(&partial, e))?;
        drop(file);

        if hash.trim().is_empty() {
            warn!("No hash given for {} {}, skipping verification", kind, name);
        }
        if let Err(e) = verify_digest(hash, &hasher.finalize()) {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| FetchError::io(&target, e))?;

        debug!("Stored {} bytes at {}", size, target.display());
        Ok(target)
    }

    async fn discard(&self, kind: ArtifactKind) -> Result<(), FetchError> {
        let dir = self.dir(kind);
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FetchError::io(dir, e)),
        }
    }
}
