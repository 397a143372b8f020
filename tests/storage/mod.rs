//! Shared storage integration tests.
//!
//! Tests the CommandStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod command_store_tests;
