//! Runbook Tools Module
//!
//! Built-in tool integrations for the runbook engine: data
//! summarization, demo-mode email, read-only database queries, and an
//! in-process CRM directory, plus the template planner that maps
//! queries onto canned plans over these tools.

pub mod catalog;
pub mod crm;
pub mod data;
pub mod database;
pub mod email;
pub mod planner;

pub use catalog::default_registry;
pub use crm::{CreateCrmContactTool, CrmContact, CrmDirectory, LookupCrmContactTool};
pub use data::SummarizeDataTool;
pub use database::QueryDatabaseTool;
pub use email::SendEmailTool;
pub use planner::TemplatePlanner;

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_core::context::ExecutionContext;
    use runbook_core::engine::Engine;
    use runbook_core::planner::Planner;
    use runbook_core::run::RunStatus;
    use runbook_core::store::{MemoryPlanStore, MemoryRunStore, PlanStore, RunStore};
    use serde_json::json;
    use std::sync::Arc;

    fn engine() -> (Engine, Arc<runbook_core::registry::ToolRegistry>) {
        let registry = Arc::new(default_registry().unwrap());
        let runs: Arc<dyn RunStore> = Arc::new(MemoryRunStore::new());
        let plans: Arc<dyn PlanStore> = Arc::new(MemoryPlanStore::new());
        (Engine::new(Arc::clone(&registry), runs, plans), registry)
    }

    #[tokio::test]
    async fn test_generated_plan_runs_end_to_end() {
        let (engine, registry) = engine();
        let planner = TemplatePlanner::new(registry);
        let plan = planner
            .generate("query the customer database and email the result", None)
            .await
            .unwrap();

        // Recipient comes from the context; the email step is
        // pre-authorized so the run completes in one pass
        let context = ExecutionContext::new()
            .with_param("recipient", "ops@example.com")
            .with_grant(1, json!(true));
        let record = engine.execute(&plan, context).await.unwrap();

        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.step_results.len(), 2);
        assert_eq!(record.step_results[0].data["row_count"], json!(4));
        assert_eq!(record.step_results[1].data["status"], json!("mocked"));
        assert_eq!(record.step_results[1].data["to"], json!("ops@example.com"));
    }

    #[tokio::test]
    async fn test_generated_plan_suspends_at_email_step() {
        let (engine, registry) = engine();
        let planner = TemplatePlanner::new(registry);
        let plan = planner
            .generate("query the customer database and email the result", None)
            .await
            .unwrap();

        let context = ExecutionContext::new().with_param("recipient", "ops@example.com");
        let record = engine.execute(&plan, context).await.unwrap();

        assert_eq!(record.status, RunStatus::AwaitingClarification);
        assert_eq!(record.step_results.len(), 1);
        assert_eq!(record.clarification.pending_step(), Some(1));
    }
}
