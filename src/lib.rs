//! Runbook: plan lifecycle and execution-state engine
//!
//! This binary crate wires the core engine, the tool catalog, the run
//! store, and the HTTP API into one command-line front end. The
//! reusable pieces live in the workspace member crates.

pub mod cli;

// Re-export the CLI surface for integration tests
pub use cli::{parse_args, run_cli_mode, Args, ExitCode, Mode};
