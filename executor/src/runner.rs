//! Runs a single command and records its result

use anyhow::Context;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, info};
use wibed_shared::result_files::{EXIT_CODE as EXIT_CODE_FILE, STDERR as STDERR_FILE, STDOUT as STDOUT_FILE};
use wibed_shared::CommandRecord;

/// Exit code recorded for a finished process: signals map to `128 + signal`
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

/// What a finished command left behind
#[derive(Debug)]
pub struct Outcome {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run `record` through `sh -c` and collect its output
pub async fn execute(record: &CommandRecord) -> Outcome {
    info!("Running command {}: {}", record.id, record.command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(&record.command)
        .stdin(Stdio::null())
        .output()
        .await;

    let outcome = match output {
        Ok(output) => Outcome {
            code: exit_code(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        },
        // Report the spawn failure as the command's own result
        Err(e) => Outcome {
            code: 127,
            stdout: Vec::new(),
            stderr: format!("failed to run sh: {}", e).into_bytes(),
        },
    };
    debug!("Command {} exited with {}", record.id, outcome.code);
    outcome
}

/// Write the result of command `id` under `results_dir`.
///
/// The exit code is written last and atomically; its presence marks the
/// record complete.
pub async fn store(id: i64, outcome: &Outcome, results_dir: &Path) -> anyhow::Result<()> {
    let dir = results_dir.join(id.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    write_atomic(&dir.join(STDOUT_FILE), &outcome.stdout).await?;
    write_atomic(&dir.join(STDERR_FILE), &outcome.stderr).await?;
    write_atomic(&dir.join(EXIT_CODE_FILE), outcome.code.to_string().as_bytes()).await?;
    Ok(())
}

async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let mut temp = PathBuf::from(path);
    temp.set_extension("tmp");
    tokio::fs::write(&temp, data)
        .await
        .with_context(|| format!("writing {}", temp.display()))?;
    tokio::fs::rename(&temp, path)
        .await
        .with_context(|| format!("renaming {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(dir: &Path, id: i64, file: &str) -> String {
        std::fs::read_to_string(dir.join(id.to_string()).join(file)).unwrap()
    }

    #[tokio::test]
    async fn test_records_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let record = CommandRecord::new(6, "echo out; echo err >&2; exit 3");

        let outcome = execute(&record).await;
        assert_eq!(outcome.code, 3);
        store(record.id, &outcome, dir.path()).await.unwrap();
        assert_eq!(read(dir.path(), 6, STDOUT_FILE), "out\n");
        assert_eq!(read(dir.path(), 6, STDERR_FILE), "err\n");
        assert_eq!(read(dir.path(), 6, EXIT_CODE_FILE), "3");
        assert!(!dir.path().join("6").join("exitCode.tmp").exists());
    }

    #[tokio::test]
    async fn test_signal_maps_above_128() {
        let record = CommandRecord::new(1, "kill -9 $$");
        assert_eq!(execute(&record).await.code, 137);
    }

    #[tokio::test]
    async fn test_multiline_command() {
        let dir = tempfile::tempdir().unwrap();
        let record = CommandRecord::new(2, "echo a\necho b");

        let outcome = execute(&record).await;
        store(record.id, &outcome, dir.path()).await.unwrap();
        assert_eq!(read(dir.path(), 2, STDOUT_FILE), "a\nb\n");
    }
}
