//! One report/response exchange with the controller

mod client;
mod cycle;

pub use client::{Controller, HttpController, PollError};
pub use cycle::PollCycle;
