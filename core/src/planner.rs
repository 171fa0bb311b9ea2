//! Planner contract — opaque query-to-plan translation
//!
//! Plan generation is an external collaborator: the engine consumes
//! whatever `Plan` a planner returns and never retries a failed
//! generation on its own.

use async_trait::async_trait;

use crate::plan::{Plan, PlanError};

/// Plan generation errors
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    /// The planner could not map the query to any plan
    #[error("no plan for query: {0}")]
    Unplannable(String),

    /// The planner produced steps that violate plan invariants
    #[error("planner produced an invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// The planner's backing service failed
    #[error("planner backend error: {0}")]
    Backend(String),
}

/// Turns a natural-language query into an executable plan
#[async_trait]
pub trait Planner: Send + Sync {
    /// Generate a plan for `query`. `file_ref` names an uploaded data
    /// reference the plan's steps may consume through the execution
    /// context.
    async fn generate(&self, query: &str, file_ref: Option<&str>) -> Result<Plan, PlanningError>;
}
