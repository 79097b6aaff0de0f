//! Command results written by the executor

mod store;

pub use store::ResultStore;
