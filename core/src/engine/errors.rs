//! Engine errors
//!
//! Step-level faults (bad references, unknown tools, tool failures) are
//! not errors here: the engine converts those into a terminal `failed`
//! run record. These variants cover contract violations and
//! infrastructure failures that must reach the caller.

use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("run {run_id} is not awaiting clarification")]
    NotSuspended { run_id: Uuid },

    /// Another writer (engine or rollback manager) holds this run
    #[error("run {run_id} is busy with another operation")]
    Busy { run_id: Uuid },

    #[error("rollback target {target} out of range: run {run_id} has {recorded} recorded steps")]
    RollbackTargetOutOfRange {
        run_id: Uuid,
        target: usize,
        recorded: usize,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
