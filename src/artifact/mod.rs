//! Firmware and overlay artifacts
//!
//! Downloading is pluggable through [`ArtifactFetcher`]; installing is left
//! to an optional external [`InstallHook`].

mod fetcher;
mod hook;

pub use fetcher::{ArtifactFetcher, ArtifactKind, FetchError, HttpFetcher};
pub use hook::InstallHook;
