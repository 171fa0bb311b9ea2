//! Runbook Core Module
//!
//! The core module provides the plan lifecycle and execution-state engine:
//! immutable plans, the sequential step executor with suspend/resume,
//! the append-only run record, and the rollback manager. Concrete tools,
//! durable storage, and the HTTP surface live in sibling crates and plug
//! in through the traits defined here.

pub mod clarification;
pub mod config;
pub mod context;
pub mod engine;
pub mod plan;
pub mod planner;
pub mod registry;
pub mod rollback;
pub mod run;
pub mod store;

pub use clarification::{Clarification, ClarificationKind, Resolution};
pub use config::{ConfigManager, RunbookConfig};
pub use context::{CancellationFlag, ExecutionContext};
pub use engine::{Engine, ExecutionError, RunLocks};
pub use plan::{InputValue, Plan, PlanError, Step, StepInput};
pub use planner::{Planner, PlanningError};
pub use registry::{ResolvedInputs, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};
pub use rollback::RollbackManager;
pub use run::{
    FailureKind, RollbackEntry, RunRecord, RunStatus, SkipReason, SkippedUndo, StepFailure,
    StepResult, StepStatus,
};
pub use store::{
    MemoryPlanStore, MemoryRunStore, PlanStore, PlanSummary, RunFilter, RunStore, RunSummary,
    StoreError,
};
