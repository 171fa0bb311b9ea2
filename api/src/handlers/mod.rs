//! API Handlers Module
//!
//! Request handlers for the run engine's HTTP surface. Responses are
//! core structures serialized directly; errors map onto status codes
//! (404 unknown ids, 409 conflicting state, 422 impossible requests).

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use runbook_core::engine::{Engine, ExecutionError};
use runbook_core::planner::{Planner, PlanningError};
use runbook_core::registry::ToolRegistry;
use runbook_core::rollback::RollbackManager;
use runbook_core::run::{RunRecord, RunStatus};
use runbook_core::store::{PlanStore, RunFilter, RunStore, StoreError};

use crate::models::{CreatePlanRequest, ResumeRequest, RollbackRequest, StartRunRequest};

/// Shared state behind every handler
pub struct ApiState {
    /// Step executor
    pub engine: Arc<Engine>,
    /// Rollback manager sharing the engine's run locks
    pub rollback: Arc<RollbackManager>,
    /// Query-to-plan generator
    pub planner: Arc<dyn Planner>,
    /// Tool registry, read-only for the process lifetime
    pub registry: Arc<ToolRegistry>,
    /// Run persistence
    pub runs: Arc<dyn RunStore>,
    /// Plan persistence
    pub plans: Arc<dyn PlanStore>,
    /// Pending clarifications older than this are flagged stale in
    /// listings; they are never auto-resolved
    pub stale_after_secs: Option<u64>,
}

/// Health check endpoint
#[debug_handler]
pub async fn health_check() -> Json<HashMap<String, String>> {
    let mut response = HashMap::new();
    response.insert("status".to_string(), "healthy".to_string());
    response.insert("service".to_string(), "runbook-api".to_string());
    Json(response)
}

/// List registered tools with their capability flags
#[debug_handler]
pub async fn list_tools(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Listing registered tools");
    serde_json::to_value(state.registry.specs())
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Generate a plan for a query and store it
#[debug_handler]
pub async fn create_plan(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Planning query: {}", request.query);

    let plan = match state
        .planner
        .generate(&request.query, request.file_ref.as_deref())
        .await
    {
        Ok(plan) => plan,
        Err(e) => {
            tracing::error!("Planning failed: {}", e);
            return Err(planning_status(&e));
        }
    };

    if let Err(e) = state.plans.put(&plan).await {
        tracing::error!("Failed to store plan: {}", e);
        return Err(store_status(&e));
    }
    serde_json::to_value(&plan)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// List stored plans, most recent first
#[debug_handler]
pub async fn list_plans(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Listing plans");

    match state.plans.list().await {
        Ok(summaries) => serde_json::to_value(summaries)
            .map(Json)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
        Err(e) => {
            tracing::error!("Failed to list plans: {}", e);
            Err(store_status(&e))
        }
    }
}

/// Get a stored plan by id
#[debug_handler]
pub async fn get_plan(
    State(state): State<Arc<ApiState>>,
    Path(plan_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Getting plan: {}", plan_id);

    let plan_id = parse_id(&plan_id)?;
    match state.plans.get(plan_id).await {
        Ok(plan) => serde_json::to_value(&plan)
            .map(Json)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
        Err(e) => {
            tracing::error!("Failed to get plan: {}", e);
            Err(store_status(&e))
        }
    }
}

/// Execute a stored plan
#[debug_handler]
pub async fn start_run(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<StartRunRequest>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Starting run for plan: {}", request.plan_id);

    match state.engine.run_stored(request.plan_id, request.context()).await {
        Ok(record) => run_response(&record, state.stale_after_secs).map(Json),
        Err(e) => {
            tracing::error!("Run failed to start: {}", e);
            Err(execution_status(&e))
        }
    }
}

/// List run summaries, most recent first
///
/// Accepts `plan_id`, `status`, and `limit` query parameters.
#[debug_handler]
pub async fn list_runs(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Listing runs");

    let mut filter = RunFilter::default();
    if let Some(plan_id) = params.get("plan_id") {
        filter.plan_id = Some(parse_id(plan_id)?);
    }
    if let Some(status) = params.get("status") {
        filter.status = Some(RunStatus::parse(status).ok_or(StatusCode::BAD_REQUEST)?);
    }
    if let Some(limit) = params.get("limit") {
        filter.limit = Some(limit.parse().map_err(|_| StatusCode::BAD_REQUEST)?);
    }

    let summaries = match state.runs.list(&filter).await {
        Ok(summaries) => summaries,
        Err(e) => {
            tracing::error!("Failed to list runs: {}", e);
            return Err(store_status(&e));
        }
    };

    let runs = summaries
        .iter()
        .map(|summary| {
            let mut value =
                serde_json::to_value(summary).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            if let Value::Object(fields) = &mut value {
                if is_stale(summary.pending_since, state.stale_after_secs) {
                    fields.insert("stale_clarification".to_string(), Value::Bool(true));
                }
            }
            Ok(value)
        })
        .collect::<Result<Vec<_>, StatusCode>>()?;
    Ok(Json(Value::Array(runs)))
}

/// Get a run record by id
#[debug_handler]
pub async fn get_run(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Getting run: {}", run_id);

    let run_id = parse_id(&run_id)?;
    match state.runs.get(run_id).await {
        Ok(record) => run_response(&record, state.stale_after_secs).map(Json),
        Err(e) => {
            tracing::error!("Failed to get run: {}", e);
            Err(store_status(&e))
        }
    }
}

/// Full appended history of a run, awaiting markers included
#[debug_handler]
pub async fn run_audit(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Fetching audit trail for run: {}", run_id);

    let run_id = parse_id(&run_id)?;
    match state.runs.audit(run_id).await {
        Ok(rows) => serde_json::to_value(rows)
            .map(Json)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
        Err(e) => {
            tracing::error!("Failed to fetch audit trail: {}", e);
            Err(store_status(&e))
        }
    }
}

/// Resume a suspended run with a clarification decision
#[debug_handler]
pub async fn resume_run(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!("Resuming run: {}", run_id);

    let run_id = parse_id(&run_id)?;
    match state.engine.resume(run_id, request.resolution()).await {
        Ok(record) => run_response(&record, state.stale_after_secs).map(Json),
        Err(e) => {
            tracing::error!("Failed to resume run: {}", e);
            Err(execution_status(&e))
        }
    }
}

/// Roll a run back to a target step
#[debug_handler]
pub async fn rollback_run(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<Json<Value>, StatusCode> {
    tracing::debug!(
        "Rolling back run {} to step {}",
        run_id,
        request.target_step_index
    );

    let run_id = parse_id(&run_id)?;
    let reason = request
        .reason
        .clone()
        .unwrap_or_else(|| "requested via api".to_string());
    match state
        .rollback
        .rollback(run_id, request.target_step_index, reason)
        .await
    {
        Ok(record) => run_response(&record, state.stale_after_secs).map(Json),
        Err(e) => {
            tracing::error!("Failed to roll back run: {}", e);
            Err(execution_status(&e))
        }
    }
}

fn parse_id(text: &str) -> Result<Uuid, StatusCode> {
    Uuid::parse_str(text).map_err(|_| StatusCode::BAD_REQUEST)
}

/// Run record serialized with its final output and staleness flag.
fn run_response(record: &RunRecord, stale_after_secs: Option<u64>) -> Result<Value, StatusCode> {
    let mut value =
        serde_json::to_value(record).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if let Value::Object(fields) = &mut value {
        if record.status == RunStatus::Completed {
            if let Some(output) = record.output_summary() {
                fields.insert("output".to_string(), output.clone());
            }
        }
        if is_stale(record.clarification.pending_since(), stale_after_secs) {
            fields.insert("stale_clarification".to_string(), Value::Bool(true));
        }
    }
    Ok(value)
}

fn is_stale(pending_since: Option<DateTime<Utc>>, stale_after_secs: Option<u64>) -> bool {
    match (pending_since, stale_after_secs) {
        (Some(since), Some(secs)) => {
            let threshold = chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));
            Utc::now() - since > threshold
        }
        _ => false,
    }
}

fn execution_status(err: &ExecutionError) -> StatusCode {
    match err {
        ExecutionError::RunNotFound(_) | ExecutionError::PlanNotFound(_) => StatusCode::NOT_FOUND,
        ExecutionError::NotSuspended { .. } | ExecutionError::Busy { .. } => StatusCode::CONFLICT,
        ExecutionError::RollbackTargetOutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ExecutionError::Store(store) => store_status(store),
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn planning_status(err: &PlanningError) -> StatusCode {
    match err {
        PlanningError::Unplannable(_) | PlanningError::InvalidPlan(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PlanningError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
