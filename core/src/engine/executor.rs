//! Executor: runs plan steps in order, recording everything as it goes
//!
//! Each step goes through the same gauntlet: cancellation check,
//! clarification gate, input resolution, registry dispatch, invocation.
//! The first failure ends the run; the first unmet clarification
//! suspends it. Every outcome is written through the run store before
//! the loop moves on, so the audit trail is accurate even if the
//! process dies mid-run.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clarification::{Clarification, Resolution};
use crate::context::ExecutionContext;
use crate::engine::{ExecutionError, RunLocks};
use crate::plan::{InputValue, Plan};
use crate::registry::{ResolvedInputs, ToolRegistry};
use crate::run::{FailureKind, RunRecord, RunStatus, StepFailure, StepResult};
use crate::store::{PlanStore, RunStore, StoreError};

/// Sequential plan executor
pub struct Engine {
    registry: Arc<ToolRegistry>,
    runs: Arc<dyn RunStore>,
    plans: Arc<dyn PlanStore>,
    locks: Arc<RunLocks>,
}

impl Engine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        runs: Arc<dyn RunStore>,
        plans: Arc<dyn PlanStore>,
    ) -> Self {
        Engine {
            registry,
            runs,
            plans,
            locks: Arc::new(RunLocks::new()),
        }
    }

    /// Writer locks, shared with the rollback manager so execution and
    /// rollback never mutate the same run concurrently.
    pub fn locks(&self) -> Arc<RunLocks> {
        Arc::clone(&self.locks)
    }

    /// Execute a plan from its first step.
    ///
    /// The plan is persisted before the run starts so a later resume can
    /// recover it by id. Returns the run record in its final state:
    /// `completed`, `failed`, or `awaiting_clarification`.
    pub async fn execute(
        &self,
        plan: &Plan,
        context: ExecutionContext,
    ) -> Result<RunRecord, ExecutionError> {
        self.plans.put(plan).await?;

        let mut record = RunRecord::new(plan.id, context.clone());
        self.runs.create_run(&record).await?;
        let _guard = self.locks.acquire(record.id)?;

        info!(
            run_id = %record.id,
            plan_id = %plan.id,
            steps = plan.step_count(),
            "run started"
        );
        record.status = RunStatus::Running;
        self.runs.set_status(record.id, RunStatus::Running).await?;

        self.run_loop(plan, &mut record, &context, 0).await?;
        Ok(record)
    }

    /// Execute a previously stored plan by id.
    pub async fn run_stored(
        &self,
        plan_id: Uuid,
        context: ExecutionContext,
    ) -> Result<RunRecord, ExecutionError> {
        let plan = self.fetch_plan(plan_id).await?;
        self.execute(&plan, context).await
    }

    /// Resume a run suspended on a clarification.
    ///
    /// An approval grants the suspended step its requirement and re-enters
    /// the loop at that step; a denial fails the step and halts the run.
    pub async fn resume(
        &self,
        run_id: Uuid,
        resolution: Resolution,
    ) -> Result<RunRecord, ExecutionError> {
        let _guard = self.locks.acquire(run_id)?;

        let mut record = self.fetch_run(run_id).await?;
        if record.status != RunStatus::AwaitingClarification {
            return Err(ExecutionError::NotSuspended { run_id });
        }
        let Some(step_index) = record.clarification.pending_step() else {
            return Err(ExecutionError::NotSuspended { run_id });
        };
        let plan = self.fetch_plan(record.plan_id).await?;

        if let Some(next) = record.clarification.apply(&resolution) {
            record.clarification = next;
            self.runs
                .set_clarification(run_id, &record.clarification)
                .await?;
        }

        match resolution {
            Resolution::Approve { value } => {
                let mut context = record.context.clone();
                context.grant(step_index, value.unwrap_or(Value::Bool(true)));
                record.context = context.clone();
                self.runs.set_context(run_id, &context).await?;

                info!(run_id = %run_id, step_index, "run resumed");
                record.status = RunStatus::Running;
                self.runs.set_status(run_id, RunStatus::Running).await?;

                self.run_loop(&plan, &mut record, &context, step_index)
                    .await?;
            }
            Resolution::Deny { reason } => {
                let message = reason
                    .unwrap_or_else(|| "required approval was denied".to_string());
                let failure = StepFailure::new(FailureKind::ClarificationDenied, message);
                let tool_id = plan
                    .steps
                    .get(step_index)
                    .map(|step| step.tool_id.clone())
                    .unwrap_or_default();
                self.fail_step(&mut record, step_index, &tool_id, failure)
                    .await?;
            }
        }
        Ok(record)
    }

    /// Per-step loop shared by execute and resume.
    async fn run_loop(
        &self,
        plan: &Plan,
        record: &mut RunRecord,
        context: &ExecutionContext,
        start: usize,
    ) -> Result<(), ExecutionError> {
        for index in start..plan.steps.len() {
            let step = &plan.steps[index];

            // Cooperative cancellation: only between steps, never mid-tool
            if context.is_cancelled() {
                let failure = StepFailure::new(
                    FailureKind::Cancelled,
                    format!("run cancelled before step {index}"),
                );
                self.fail_step(record, index, &step.tool_id, failure).await?;
                return Ok(());
            }

            debug!(
                run_id = %record.id,
                step_index = index,
                tool_id = %step.tool_id,
                "step started"
            );

            // Clarification gate, checked before inputs resolve
            if let Some(kind) = step.clarification_requirement() {
                if !context.has_grant(index) {
                    let question =
                        format!("step {index} ({}) requires {}", step.task, kind.as_str());
                    let marker = StepResult::awaiting(index, &step.tool_id, kind, &question);
                    self.runs.append_result(record.id, &marker).await?;

                    record.clarification = Clarification::pending(index, kind, question);
                    self.runs
                        .set_clarification(record.id, &record.clarification)
                        .await?;
                    record.status = RunStatus::AwaitingClarification;
                    self.runs
                        .set_status(record.id, RunStatus::AwaitingClarification)
                        .await?;

                    info!(
                        run_id = %record.id,
                        step_index = index,
                        kind = kind.as_str(),
                        "run suspended awaiting clarification"
                    );
                    return Ok(());
                }
            }

            let inputs = match resolve_inputs(plan, index, record) {
                Ok(inputs) => inputs,
                Err(failure) => {
                    self.fail_step(record, index, &step.tool_id, failure).await?;
                    return Ok(());
                }
            };

            let Some(tool) = self.registry.get(&step.tool_id) else {
                let failure = StepFailure::new(
                    FailureKind::ToolNotFound,
                    format!("tool '{}' is not registered", step.tool_id),
                );
                self.fail_step(record, index, &step.tool_id, failure).await?;
                return Ok(());
            };

            match tool.invoke(&inputs, context).await {
                Ok(data) => {
                    let result = StepResult::success(index, &step.tool_id, data);
                    self.runs.append_result(record.id, &result).await?;
                    record.step_results.push(result);
                    debug!(run_id = %record.id, step_index = index, "step succeeded");
                }
                Err(err) => {
                    let failure =
                        StepFailure::new(FailureKind::ToolExecution, err.to_string());
                    self.fail_step(record, index, &step.tool_id, failure).await?;
                    return Ok(());
                }
            }
        }

        record.status = RunStatus::Completed;
        self.runs.set_status(record.id, RunStatus::Completed).await?;
        info!(
            run_id = %record.id,
            steps = record.step_results.len(),
            "run completed"
        );
        Ok(())
    }

    /// Record a step failure and move the run to `failed`.
    async fn fail_step(
        &self,
        record: &mut RunRecord,
        index: usize,
        tool_id: &str,
        failure: StepFailure,
    ) -> Result<(), ExecutionError> {
        warn!(
            run_id = %record.id,
            step_index = index,
            kind = ?failure.kind,
            "step failed: {}",
            failure.message
        );
        let result = StepResult::failure(index, tool_id, &failure);
        self.runs.append_result(record.id, &result).await?;
        record.step_results.push(result);
        record.status = RunStatus::Failed;
        self.runs.set_status(record.id, RunStatus::Failed).await?;
        Ok(())
    }

    async fn fetch_run(&self, run_id: Uuid) -> Result<RunRecord, ExecutionError> {
        match self.runs.get(run_id).await {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound(_)) => Err(ExecutionError::RunNotFound(run_id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_plan(&self, plan_id: Uuid) -> Result<Plan, ExecutionError> {
        match self.plans.get(plan_id).await {
            Ok(plan) => Ok(plan),
            Err(StoreError::NotFound(_)) => Err(ExecutionError::PlanNotFound(plan_id)),
            Err(err) => Err(err.into()),
        }
    }
}

/// Resolve a step's declared inputs against the run's recorded outputs.
///
/// Literals pass through unchanged, except that literal strings get
/// `${name}` segments interpolated. References resolve to the exact
/// payload of the referenced step's `success` result or fail with a
/// reference error.
fn resolve_inputs(
    plan: &Plan,
    index: usize,
    record: &RunRecord,
) -> Result<ResolvedInputs, StepFailure> {
    let step = &plan.steps[index];
    let mut resolved = ResolvedInputs::new();
    for input in &step.inputs {
        let value = match &input.value {
            InputValue::Literal { value } => match value {
                Value::String(text) => interpolate(text, plan, index, record)?,
                other => other.clone(),
            },
            InputValue::StepOutput { step: wanted } => {
                lookup_output(*wanted, index, record)?
            }
            InputValue::NamedOutput { name } => {
                let wanted = plan.named_step_before(name, index).ok_or_else(|| {
                    StepFailure::new(
                        FailureKind::Reference,
                        format!("no earlier step produces output '{name}'"),
                    )
                })?;
                lookup_output(wanted, index, record)?
            }
        };
        resolved.push(input.name.clone(), value);
    }
    Ok(resolved)
}

fn lookup_output(wanted: usize, index: usize, record: &RunRecord) -> Result<Value, StepFailure> {
    record.output_of(wanted).cloned().ok_or_else(|| {
        StepFailure::new(
            FailureKind::Reference,
            format!("step {index} references step {wanted}, which has no successful result"),
        )
    })
}

/// Replace `${name}` segments in a literal string with the named step
/// outputs recorded so far. Non-string outputs render as compact JSON.
fn interpolate(
    text: &str,
    plan: &Plan,
    index: usize,
    record: &RunRecord,
) -> Result<Value, StepFailure> {
    if !text.contains("${") {
        return Ok(Value::String(text.to_string()));
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder is plain text
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = &after[..end];
        let wanted = plan.named_step_before(name, index).ok_or_else(|| {
            StepFailure::new(
                FailureKind::Reference,
                format!("no earlier step produces output '{name}'"),
            )
        })?;
        let value = lookup_output(wanted, index, record)?;
        match value {
            Value::String(text) => out.push_str(&text),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}
