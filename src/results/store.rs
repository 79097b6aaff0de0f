//! Filesystem ledger of command results
//!
//! The executor writes one directory per command id:
//! ```text
//! results/<id>/stdout
//! results/<id>/stderr
//! results/<id>/exitCode   (written last, marks the record complete)
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use wibed_shared::result_files::{EXIT_CODE as EXIT_CODE_FILE, STDERR as STDERR_FILE, STDOUT as STDOUT_FILE};
use wibed_shared::ResultRecord;

/// Reads results produced by the executor
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// All complete results with an id above `result_ack`, ascending.
    ///
    /// Records whose exit code is not written yet are skipped; they show up
    /// on a later tick once the executor finishes them.
    pub async fn list_pending(&self, result_ack: Option<i64>) -> std::io::Result<Vec<ResultRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<i64>().ok()) else {
                continue;
            };
            if result_ack.map_or(true, |ack| id > ack) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut pending = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_record(id).await? {
                Some(record) => pending.push(record),
                None => debug!("Result {} not complete yet", id),
            }
        }

        Ok(pending)
    }

    /// Read one record, `None` if it is not complete
    async fn read_record(&self, id: i64) -> std::io::Result<Option<ResultRecord>> {
        let dir = self.root.join(id.to_string());

        let Some(raw_code) = read_optional(&dir.join(EXIT_CODE_FILE)).await? else {
            return Ok(None);
        };
        let raw_code = String::from_utf8_lossy(&raw_code);
        let Ok(exit_code) = raw_code.trim().parse::<i32>() else {
            warn!("Result {} has unreadable exit code {:?}, skipping", id, raw_code.trim());
            return Ok(None);
        };

        let stdout = read_optional(&dir.join(STDOUT_FILE)).await?.unwrap_or_default();
        let stderr = read_optional(&dir.join(STDERR_FILE)).await?.unwrap_or_default();

        Ok(Some(ResultRecord {
            id,
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        }))
    }

    /// Remove every stored result
    pub async fn clear(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
