//! Persistent node configuration
//!
//! Two interchangeable backends sit behind [`ConfigStore`]:
//! - [`FileStore`] keeps one file per key in a directory
//! - [`UciStore`] uses the router's UCI subsystem
//!
//! The backend is chosen once at startup by [`detect_backend`].

mod file;
mod traits;
mod uci;

pub use file::FileStore;
pub use traits::{ConfigError, ConfigStore};
pub use uci::UciStore;

use std::path::{Path, PathBuf};

/// Locations probed for the `uci` binary
pub const UCI_CANDIDATES: [&str; 3] = ["/sbin/uci", "/usr/sbin/uci", "/bin/uci"];

/// Package file that must exist before UCI is used
pub const UCI_PACKAGE_FILE: &str = "/etc/config/wibed";

/// Backend selection requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BackendKind {
    /// Probe the environment
    #[default]
    Auto,
    /// Flat-file directory
    File,
    /// Router UCI subsystem
    Uci,
}

/// Resolved backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    File(PathBuf),
    Uci(PathBuf),
}

/// Probe for UCI: the binary and the package file must both be present
pub fn detect_backend(candidates: &[&str], package_file: &Path, config_dir: &Path) -> Backend {
    let program = candidates.iter().map(Path::new).find(|p| p.exists());
    match program {
        Some(program) if package_file.exists() => Backend::Uci(program.to_path_buf()),
        _ => Backend::File(config_dir.to_path_buf()),
    }
}

/// Resolve the requested backend kind into a concrete backend
pub fn resolve_backend(kind: BackendKind, config_dir: &Path) -> Backend {
    match kind {
        BackendKind::Auto => detect_backend(&UCI_CANDIDATES, Path::new(UCI_PACKAGE_FILE), config_dir),
        BackendKind::File => Backend::File(config_dir.to_path_buf()),
        BackendKind::Uci => {
            let program = UCI_CANDIDATES
                .iter()
                .map(Path::new)
                .find(|p| p.exists())
                .unwrap_or(Path::new(UCI_CANDIDATES[0]));
            Backend::Uci(program.to_path_buf())
        }
    }
}

/// Open the store for a resolved backend
pub fn open_store(backend: &Backend) -> Box<dyn ConfigStore> {
    match backend {
        Backend::File(dir) => Box::new(FileStore::new(dir.clone())),
        Backend::Uci(program) => Box::new(UciStore::new(program.clone())),
    }
}
