//! CLI module
//!
//! Provides:
//! - Argument parsing for CLI modes
//! - Config loading (flag, then platform default, then env overrides)
//! - Mode dispatch (serve, plan, run, resume, rollback, history, show,
//!   audit, tools)

pub mod args;
pub mod dispatch;

// Re-exports
pub use args::{parse_args, Args, Mode};
pub use dispatch::{run_cli_mode, ExitCode};

use runbook_core::engine::ExecutionError;
use runbook_core::planner::PlanningError;
use runbook_core::store::StoreError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Setup error: {0}")]
    Setup(#[from] anyhow::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exit codes (deterministic)
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_STORE_ERROR: i32 = 2;

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, Error>;
