//! Command delivery to the executor
//!
//! This module handles:
//! - Starting the executor and waiting for its pipe
//! - Writing new controller commands in id order, exactly once each
//! - Tearing the executor down with the exit sentinel

mod channel;
#[cfg(test)]
pub mod memory;
mod pipe;
mod traits;

pub use channel::CommandChannel;
pub use pipe::{ExecutorConfig, PipeSink};
pub use traits::ChannelError;
