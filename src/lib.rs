//! Broadcast orchestrator.
//!
//! Turns one logical request into a broadcast to every control node over an
//! asynchronous message transport, collects the per-node replies under a
//! shared correlation id and returns them ordered by node. A durable command
//! ledger makes re-dispatch of the same operation idempotent.

pub mod bus;
pub mod config;
pub mod ledger;
pub mod node;
pub mod orchestration;
pub mod runtime;
pub mod storage;
pub mod topology;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use runtime::{OrchestratorRuntime, RuntimeError};
