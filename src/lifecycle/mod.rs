//! Applies controller directives to the node

mod handlers;
mod machine;

pub use handlers::HandlerContext;
pub use machine::{Applied, StateMachine};
