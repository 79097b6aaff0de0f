//! Persisted node state

mod state;

pub use state::NodeState;
