//! Rollback — best-effort reversal of a run's recorded effects
//!
//! A rollback walks the run's executed steps after a target index in
//! reverse order and asks each step's tool to undo its effect. Steps
//! that cannot be reversed (irreversible tool, missing tool, failed
//! undo) are skipped with a recorded warning rather than aborting the
//! walk. The outcome is appended to the run as a synthetic audit entry;
//! executed step results are never touched.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{ExecutionError, RunLocks};
use crate::registry::ToolRegistry;
use crate::run::{RollbackEntry, RunRecord, RunStatus, SkipReason, SkippedUndo};
use crate::store::{RunStore, StoreError};

/// Applies rollbacks to recorded runs
///
/// Shares the engine's writer locks so a rollback never interleaves
/// with an execute or resume of the same run.
pub struct RollbackManager {
    registry: Arc<ToolRegistry>,
    runs: Arc<dyn RunStore>,
    locks: Arc<RunLocks>,
}

impl RollbackManager {
    pub fn new(
        registry: Arc<ToolRegistry>,
        runs: Arc<dyn RunStore>,
        locks: Arc<RunLocks>,
    ) -> Self {
        RollbackManager {
            registry,
            runs,
            locks,
        }
    }

    /// Undo the effects of every step recorded after `target`, most
    /// recent first. The target step itself is kept.
    ///
    /// Repeating a rollback for the same target is safe: steps already
    /// undone by an earlier rollback are skipped, so no undo runs twice.
    pub async fn rollback(
        &self,
        run_id: Uuid,
        target: usize,
        reason: impl Into<String>,
    ) -> Result<RunRecord, ExecutionError> {
        let _guard = self.locks.acquire(run_id)?;

        let mut record = match self.runs.get(run_id).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return Err(ExecutionError::RunNotFound(run_id)),
            Err(err) => return Err(err.into()),
        };

        let recorded = record.step_results.len();
        if target >= recorded {
            return Err(ExecutionError::RollbackTargetOutOfRange {
                run_id,
                target,
                recorded,
            });
        }

        let reason = reason.into();
        info!(run_id = %run_id, target, reason = %reason, "rollback started");

        let already_undone = record.undone_steps();
        let mut undone = Vec::new();
        let mut skipped = Vec::new();

        for result in record
            .step_results
            .iter()
            .rev()
            .filter(|result| result.step_index > target)
        {
            let index = result.step_index;
            let tool_id = result.tool_id.clone();

            if !result.is_success() {
                skipped.push(SkippedUndo {
                    step_index: index,
                    tool_id,
                    reason: SkipReason::NotSuccessful,
                });
                continue;
            }
            if already_undone.contains(&index) {
                skipped.push(SkippedUndo {
                    step_index: index,
                    tool_id,
                    reason: SkipReason::AlreadyUndone,
                });
                continue;
            }
            let Some(tool) = self.registry.get(&tool_id) else {
                warn!(run_id = %run_id, step_index = index, tool_id = %tool_id, "undo skipped: tool missing");
                skipped.push(SkippedUndo {
                    step_index: index,
                    tool_id,
                    reason: SkipReason::ToolMissing,
                });
                continue;
            };
            if !tool.reversible() {
                warn!(run_id = %run_id, step_index = index, tool_id = %tool_id, "undo skipped: irreversible");
                skipped.push(SkippedUndo {
                    step_index: index,
                    tool_id,
                    reason: SkipReason::Irreversible,
                });
                continue;
            }

            match tool.undo(result).await {
                Ok(()) => {
                    info!(run_id = %run_id, step_index = index, tool_id = %tool_id, "step undone");
                    undone.push(index);
                }
                Err(err) => {
                    warn!(
                        run_id = %run_id,
                        step_index = index,
                        tool_id = %tool_id,
                        "undo failed: {err}"
                    );
                    skipped.push(SkippedUndo {
                        step_index: index,
                        tool_id,
                        reason: SkipReason::UndoFailed {
                            error: err.to_string(),
                        },
                    });
                }
            }
        }

        // Partial only when an effect remains in place; bookkeeping skips
        // (already undone, never succeeded) are not failures
        let partial = skipped.iter().any(|skip| {
            matches!(
                skip.reason,
                SkipReason::Irreversible | SkipReason::ToolMissing | SkipReason::UndoFailed { .. }
            )
        });

        info!(
            run_id = %run_id,
            undone = undone.len(),
            skipped = skipped.len(),
            partial,
            "rollback finished"
        );

        let entry = RollbackEntry {
            target_step_index: target,
            reason,
            undone,
            skipped,
            partial,
            timestamp: Utc::now(),
        };
        self.runs.append_rollback(run_id, &entry).await?;
        record.rollbacks.push(entry);
        record.rollback_points += 1;

        record.status = RunStatus::RolledBack;
        self.runs.set_status(run_id, RunStatus::RolledBack).await?;
        Ok(record)
    }
}
