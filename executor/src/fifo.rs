//! Named pipe setup for the executor side

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tokio::net::unix::pipe;

/// Temporary name the pipe is created under
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Identity of the pipe an executor created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeId {
    dev: u64,
    ino: u64,
}

impl PipeId {
    /// Identity of whatever is at `path` now, `None` if nothing is
    pub fn at(path: &Path) -> io::Result<Option<Self>> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) => Ok(Some(Self {
                dev: meta.dev(),
                ino: meta.ino(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Create the pipe and open its read end.
///
/// The pipe is opened read-write under a temporary name and only then moved
/// to `path`, so whoever finds `path` always finds a reader behind it. Holding
/// the write end as well keeps reads from hitting EOF between writers.
pub fn open_pipe(path: &Path) -> io::Result<(pipe::Receiver, PipeId)> {
    let staging = staging_path(path);
    remove_if_exists(&staging)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    mkfifo(&staging, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)?;

    let receiver = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(&staging)?;
    let id = PipeId::at(&staging)?.ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
    std::fs::rename(&staging, path)?;
    Ok((receiver, id))
}

/// Whether `path` still names the pipe `id`.
///
/// The agent unlinks the path once it has sent the exit sentinel, and a newer
/// executor may have put its own pipe there since.
pub fn is_owned(path: &Path, id: PipeId) -> bool {
    matches!(PipeId::at(path), Ok(Some(current)) if current == id)
}

/// Remove `path` only if it is still the pipe `id`
pub fn remove_if_owned(path: &Path, id: PipeId) -> io::Result<()> {
    if is_owned(path, id) {
        remove_if_exists(path)
    } else {
        Ok(())
    }
}

/// Remove a file, ignoring one that is already gone
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
