//! Handlers for the lifecycle directives that do real work

mod experiment;
mod upgrade;

pub use experiment::{handle_finish, handle_prepare, handle_start};
pub use upgrade::handle_upgrade;

use crate::artifact::{ArtifactFetcher, InstallHook};
use crate::results::ResultStore;

/// Outcome of a lifecycle action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Completed { message: String },
    Failed { message: String },
}

/// Collaborators shared by the handlers
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub fetcher: &'a dyn ArtifactFetcher,
    pub results: &'a ResultStore,
    pub firmware_hook: &'a InstallHook,
    pub overlay_hook: &'a InstallHook,
}
