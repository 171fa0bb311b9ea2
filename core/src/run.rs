//! Run records — the append-only audit trail of a plan execution
//!
//! A `RunRecord` is created when a run starts and mutated only by the
//! engine (appending results, changing status) and the rollback manager
//! (appending rollback markers). Executed step results are never edited
//! or removed; history is superseded by new runs, not rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::clarification::{Clarification, ClarificationKind};
use crate::context::ExecutionContext;

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    AwaitingClarification,
    RolledBack,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::AwaitingClarification => "awaiting_clarification",
            RunStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(text: &str) -> Option<RunStatus> {
        match text {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "awaiting_clarification" => Some(RunStatus::AwaitingClarification),
            "rolled_back" => Some(RunStatus::RolledBack),
            _ => None,
        }
    }

    /// Terminal statuses accept no further step results.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::RolledBack
        )
    }
}

/// Outcome of one recorded step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
    /// Audit marker written when execution suspends at a step; the step's
    /// real result arrives after resume.
    AwaitingClarification,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::AwaitingClarification => "awaiting_clarification",
        }
    }

    pub fn parse(text: &str) -> Option<StepStatus> {
        match text {
            "success" => Some(StepStatus::Success),
            "error" => Some(StepStatus::Error),
            "awaiting_clarification" => Some(StepStatus::AwaitingClarification),
            _ => None,
        }
    }
}

/// Classified step failure, preserved in the result payload for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input referenced a step that never produced a usable result
    Reference,
    /// Unknown tool identifier
    ToolNotFound,
    /// The invoked tool reported failure
    ToolExecution,
    /// A human explicitly rejected a required approval
    ClarificationDenied,
    /// The run was cancelled before this step started
    Cancelled,
}

/// Failure payload stored in an `error` step result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,

    /// Tool-reported detail, kept verbatim for audit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        StepFailure {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn to_data(&self) -> Value {
        json!({
            "kind": self.kind,
            "message": self.message,
            "detail": self.detail,
        })
    }
}

/// Result of one step, owned by the run record that contains it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Position of the step in the plan
    pub step_index: usize,

    /// Tool the step dispatched to, recorded so the audit trail and
    /// rollback need no access to the plan
    pub tool_id: String,

    pub status: StepStatus,

    /// Tool-specific payload on success, failure description on error
    pub data: Value,

    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    pub fn success(step_index: usize, tool_id: impl Into<String>, data: Value) -> Self {
        StepResult {
            step_index,
            tool_id: tool_id.into(),
            status: StepStatus::Success,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(step_index: usize, tool_id: impl Into<String>, failure: &StepFailure) -> Self {
        StepResult {
            step_index,
            tool_id: tool_id.into(),
            status: StepStatus::Error,
            data: failure.to_data(),
            timestamp: Utc::now(),
        }
    }

    pub fn awaiting(
        step_index: usize,
        tool_id: impl Into<String>,
        kind: ClarificationKind,
        question: &str,
    ) -> Self {
        StepResult {
            step_index,
            tool_id: tool_id.into(),
            status: StepStatus::AwaitingClarification,
            data: json!({ "clarification": kind, "question": question }),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Failure kind recorded in an error result's payload, if parseable.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.status != StepStatus::Error {
            return None;
        }
        serde_json::from_value(self.data.get("kind")?.clone()).ok()
    }
}

/// Why a step was not undone during a rollback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The tool declares no undo capability
    Irreversible,
    /// A previous rollback already undid this step
    AlreadyUndone,
    /// The step recorded an error, so there is no effect to reverse
    NotSuccessful,
    /// The tool is no longer registered
    ToolMissing,
    /// The undo call itself failed
    UndoFailed { error: String },
}

/// One step the rollback walk skipped, with the recorded warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedUndo {
    pub step_index: usize,
    pub tool_id: String,
    pub reason: SkipReason,
}

/// Synthetic audit entry appended by the rollback manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub target_step_index: usize,
    pub reason: String,

    /// Step indices whose effects were reversed by this rollback
    pub undone: Vec<usize>,

    /// Steps that could not be reversed, and why
    pub skipped: Vec<SkippedUndo>,

    /// True when at least one effectful step could not be undone; this is
    /// the recorded (not raised) partial-rollback warning
    pub partial: bool,

    pub timestamp: DateTime<Utc>,
}

/// The audit record of one execution attempt of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier
    pub id: Uuid,

    /// Plan this run executed
    pub plan_id: Uuid,

    pub created_at: DateTime<Utc>,

    pub status: RunStatus,

    /// Ambient parameters and granted clarifications, persisted so a
    /// suspended run can resume in a fresh process
    pub context: ExecutionContext,

    /// Current clarification slot
    #[serde(default)]
    pub clarification: Clarification,

    /// One result per executed step, append-only, strictly increasing
    /// step index
    pub step_results: Vec<StepResult>,

    /// Rollback markers, in the order they were applied
    #[serde(default)]
    pub rollbacks: Vec<RollbackEntry>,

    /// Count of rollback operations ever applied to this run
    #[serde(default)]
    pub rollback_points: u32,
}

impl RunRecord {
    pub fn new(plan_id: Uuid, context: ExecutionContext) -> Self {
        RunRecord {
            id: Uuid::new_v4(),
            plan_id,
            created_at: Utc::now(),
            status: RunStatus::Pending,
            context,
            clarification: Clarification::NotRequired,
            step_results: Vec::new(),
            rollbacks: Vec::new(),
            rollback_points: 0,
        }
    }

    /// Recorded result for a step, if the step has executed.
    pub fn result_for(&self, step_index: usize) -> Option<&StepResult> {
        self.step_results
            .iter()
            .find(|result| result.step_index == step_index)
    }

    /// Payload of a step's `success` result. `None` when the step has not
    /// run or did not succeed; callers translate that into a reference
    /// failure.
    pub fn output_of(&self, step_index: usize) -> Option<&Value> {
        self.result_for(step_index)
            .filter(|result| result.is_success())
            .map(|result| &result.data)
    }

    /// Index the next executed result must carry.
    pub fn next_step_index(&self) -> usize {
        self.step_results
            .last()
            .map(|result| result.step_index + 1)
            .unwrap_or(0)
    }

    /// Final output of a completed run: the last successful step's payload.
    pub fn output_summary(&self) -> Option<&Value> {
        self.step_results
            .iter()
            .rev()
            .find(|result| result.is_success())
            .map(|result| &result.data)
    }

    /// Step indices already undone by prior rollbacks. A repeat rollback
    /// consults this set so no step's undo runs twice.
    pub fn undone_steps(&self) -> std::collections::HashSet<usize> {
        self.rollbacks
            .iter()
            .flat_map(|entry| entry.undone.iter().copied())
            .collect()
    }
}
