//! Store contracts — injected persistence for runs and plans
//!
//! The engine has no global state: everything it records goes through
//! these traits. The in-memory implementations here back tests and
//! ephemeral sessions and enforce the same append rules the durable
//! store enforces with schema triggers, so invariant violations surface
//! identically in both.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clarification::Clarification;
use crate::context::ExecutionContext;
use crate::plan::Plan;
use crate::run::{RollbackEntry, RunRecord, RunStatus, StepResult, StepStatus};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no record for id {0}")]
    NotFound(Uuid),

    /// An append or create collided with existing audit rows
    #[error("append conflict: {0}")]
    Conflict(String),

    /// Stored data failed to parse back into domain types
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// History listing filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub plan_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

/// Run summary for history views, most recent first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub steps_recorded: usize,
    pub rollback_points: u32,

    /// Set while a clarification is pending, for staleness reporting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_since: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn of(record: &RunRecord) -> Self {
        RunSummary {
            id: record.id,
            plan_id: record.plan_id,
            created_at: record.created_at,
            status: record.status,
            steps_recorded: record.step_results.len(),
            rollback_points: record.rollback_points,
            pending_since: record.clarification.pending_since(),
        }
    }
}

/// Plan summary for listings, most recent first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: Uuid,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub step_count: usize,
}

impl PlanSummary {
    pub fn of(plan: &Plan) -> Self {
        PlanSummary {
            id: plan.id,
            query: plan.query.clone(),
            created_at: plan.created_at,
            step_count: plan.step_count(),
        }
    }
}

/// Append-oriented persistence for run records
///
/// Executed results (`success`/`error`) must arrive in strictly
/// increasing step-index order with no duplicates; implementations
/// reject violations with `Conflict`. `awaiting_clarification` markers
/// are audit rows only and never appear in a fetched record's
/// `step_results`.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, record: &RunRecord) -> Result<(), StoreError>;

    async fn append_result(&self, run_id: Uuid, result: &StepResult) -> Result<(), StoreError>;

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError>;

    async fn set_clarification(
        &self,
        run_id: Uuid,
        clarification: &Clarification,
    ) -> Result<(), StoreError>;

    async fn set_context(&self, run_id: Uuid, context: &ExecutionContext)
        -> Result<(), StoreError>;

    /// Append a rollback marker and bump the run's rollback count.
    async fn append_rollback(&self, run_id: Uuid, entry: &RollbackEntry)
        -> Result<(), StoreError>;

    async fn get(&self, run_id: Uuid) -> Result<RunRecord, StoreError>;

    /// Run summaries, most recent first.
    async fn list(&self, filter: &RunFilter) -> Result<Vec<RunSummary>, StoreError>;

    /// Every appended row in append order, awaiting markers included.
    async fn audit(&self, run_id: Uuid) -> Result<Vec<StepResult>, StoreError>;
}

/// Persistence for generated plans
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Store a plan. Plans are immutable; storing the same id twice is a
    /// no-op.
    async fn put(&self, plan: &Plan) -> Result<(), StoreError>;

    async fn get(&self, plan_id: Uuid) -> Result<Plan, StoreError>;

    /// Plan summaries, most recent first.
    async fn list(&self) -> Result<Vec<PlanSummary>, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredRun {
    record: RunRecord,
    /// Every appended row including awaiting markers, for audit parity
    /// with the durable store
    audit: Vec<StepResult>,
}

/// In-memory run store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<Uuid, StoredRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        MemoryRunStore::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(MemoryRunStore::new())
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!(
                "run {} already exists",
                record.id
            )));
        }
        runs.insert(
            record.id,
            StoredRun {
                record: record.clone(),
                audit: record.step_results.clone(),
            },
        );
        Ok(())
    }

    async fn append_result(&self, run_id: Uuid, result: &StepResult) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let stored = runs.get_mut(&run_id).ok_or(StoreError::NotFound(run_id))?;

        if result.status != StepStatus::AwaitingClarification {
            let expected = stored.record.next_step_index();
            if result.step_index != expected {
                return Err(StoreError::Conflict(format!(
                    "run {run_id} expected step index {expected}, got {}",
                    result.step_index
                )));
            }
            stored.record.step_results.push(result.clone());
        }
        stored.audit.push(result.clone());
        Ok(())
    }

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let stored = runs.get_mut(&run_id).ok_or(StoreError::NotFound(run_id))?;
        stored.record.status = status;
        Ok(())
    }

    async fn set_clarification(
        &self,
        run_id: Uuid,
        clarification: &Clarification,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let stored = runs.get_mut(&run_id).ok_or(StoreError::NotFound(run_id))?;
        stored.record.clarification = clarification.clone();
        Ok(())
    }

    async fn set_context(
        &self,
        run_id: Uuid,
        context: &ExecutionContext,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let stored = runs.get_mut(&run_id).ok_or(StoreError::NotFound(run_id))?;
        stored.record.context = context.clone();
        Ok(())
    }

    async fn append_rollback(
        &self,
        run_id: Uuid,
        entry: &RollbackEntry,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let stored = runs.get_mut(&run_id).ok_or(StoreError::NotFound(run_id))?;
        stored.record.rollbacks.push(entry.clone());
        stored.record.rollback_points += 1;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<RunRecord, StoreError> {
        let runs = self.runs.read().await;
        runs.get(&run_id)
            .map(|stored| stored.record.clone())
            .ok_or(StoreError::NotFound(run_id))
    }

    async fn list(&self, filter: &RunFilter) -> Result<Vec<RunSummary>, StoreError> {
        let runs = self.runs.read().await;
        let mut summaries: Vec<RunSummary> = runs
            .values()
            .filter(|stored| {
                filter
                    .plan_id
                    .map_or(true, |plan_id| stored.record.plan_id == plan_id)
            })
            .filter(|stored| {
                filter
                    .status
                    .map_or(true, |status| stored.record.status == status)
            })
            .map(|stored| RunSummary::of(&stored.record))
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            summaries.truncate(limit);
        }
        Ok(summaries)
    }

    async fn audit(&self, run_id: Uuid) -> Result<Vec<StepResult>, StoreError> {
        let runs = self.runs.read().await;
        runs.get(&run_id)
            .map(|stored| stored.audit.clone())
            .ok_or(StoreError::NotFound(run_id))
    }
}

/// In-memory plan store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryPlanStore {
    plans: RwLock<HashMap<Uuid, Plan>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        MemoryPlanStore::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(MemoryPlanStore::new())
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn put(&self, plan: &Plan) -> Result<(), StoreError> {
        let mut plans = self.plans.write().await;
        plans.entry(plan.id).or_insert_with(|| plan.clone());
        Ok(())
    }

    async fn get(&self, plan_id: Uuid) -> Result<Plan, StoreError> {
        let plans = self.plans.read().await;
        plans.get(&plan_id).cloned().ok_or(StoreError::NotFound(plan_id))
    }

    async fn list(&self) -> Result<Vec<PlanSummary>, StoreError> {
        let plans = self.plans.read().await;
        let mut summaries: Vec<PlanSummary> = plans.values().map(PlanSummary::of).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}
