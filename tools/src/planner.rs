//! Template Planner
//!
//! Deterministic plan generation: a handful of canned templates over the
//! built-in tools, selected by query keywords. The engine only sees the
//! `Planner` contract, so a model-backed generator can replace this
//! without touching execution.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use runbook_core::plan::{InputValue, Plan, Step, StepInput};
use runbook_core::planner::{Planner, PlanningError};
use runbook_core::registry::ToolRegistry;

/// Rows pulled for the customer-report templates
const CUSTOMER_REPORT_QUERY: &str =
    "SELECT name, email, segment, total_spend FROM customers ORDER BY total_spend DESC";

/// Maps query keywords to canned plan shapes
pub struct TemplatePlanner {
    registry: Arc<ToolRegistry>,
}

impl TemplatePlanner {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        TemplatePlanner { registry }
    }

    /// Build a step, copying the tool's authorization requirement onto it.
    fn step(&self, task: &str, tool_id: &str, inputs: Vec<StepInput>, output: &str) -> Step {
        let requires_auth = self
            .registry
            .get(tool_id)
            .map(|tool| tool.requires_auth())
            .unwrap_or(false);
        Step::new(task, tool_id, inputs, output).with_requires_auth(requires_auth)
    }

    fn query_then_email(&self, query: &str) -> Result<Plan, PlanningError> {
        debug!("Template selected: query database, then email");
        let steps = vec![
            self.step(
                "query the customer database",
                "query_database",
                vec![StepInput::new(
                    "query",
                    InputValue::literal(CUSTOMER_REPORT_QUERY),
                )],
                "rows",
            ),
            self.step(
                "email the query result",
                "send_email",
                vec![
                    StepInput::new("subject", InputValue::literal("Customer report")),
                    StepInput::new(
                        "body",
                        InputValue::literal("Requested rows:\n\n${rows}"),
                    ),
                ],
                "delivery",
            ),
        ];
        Ok(Plan::new(query, steps)?)
    }

    fn summarize_then_email(
        &self,
        query: &str,
        file_ref: Option<&str>,
    ) -> Result<Plan, PlanningError> {
        debug!("Template selected: summarize, then email");
        let steps = vec![
            self.summarize_step(file_ref),
            self.step(
                "email the summary",
                "send_email",
                vec![
                    StepInput::new("subject", InputValue::literal("Data summary")),
                    StepInput::new("body", InputValue::step_output(0)),
                ],
                "delivery",
            ),
        ];
        Ok(Plan::new(query, steps)?)
    }

    fn lookup_then_email(&self, query: &str) -> Result<Plan, PlanningError> {
        debug!("Template selected: CRM lookup, then email");
        let steps = vec![
            self.step(
                "look up matching CRM contacts",
                "lookup_crm_contact",
                vec![],
                "contacts",
            ),
            self.step(
                "email the contact list",
                "send_email",
                vec![
                    StepInput::new("subject", InputValue::literal("CRM contacts")),
                    StepInput::new(
                        "body",
                        InputValue::literal("Matching contacts:\n\n${contacts}"),
                    ),
                ],
                "delivery",
            ),
        ];
        Ok(Plan::new(query, steps)?)
    }

    fn query_then_summarize(&self, query: &str) -> Result<Plan, PlanningError> {
        debug!("Template selected: query database, then summarize");
        let steps = vec![
            self.step(
                "query the customer database",
                "query_database",
                vec![StepInput::new(
                    "query",
                    InputValue::literal(CUSTOMER_REPORT_QUERY),
                )],
                "rows",
            ),
            self.step(
                "summarize the query result",
                "summarize_data",
                vec![StepInput::new("data", InputValue::step_output(0))],
                "summary",
            ),
        ];
        Ok(Plan::new(query, steps)?)
    }

    fn summarize_only(&self, query: &str, file_ref: Option<&str>) -> Result<Plan, PlanningError> {
        debug!("Template selected: summarize");
        Ok(Plan::new(query, vec![self.summarize_step(file_ref)])?)
    }

    fn summarize_step(&self, file_ref: Option<&str>) -> Step {
        let mut inputs = Vec::new();
        if let Some(source) = file_ref {
            inputs.push(StepInput::new("source", InputValue::literal(source)));
        }
        self.step("summarize the requested data", "summarize_data", inputs, "summary")
    }
}

#[async_trait]
impl Planner for TemplatePlanner {
    async fn generate(&self, query: &str, file_ref: Option<&str>) -> Result<Plan, PlanningError> {
        let lowered = query.to_lowercase();
        let wants_email = ["email", "send", "notify"]
            .iter()
            .any(|keyword| lowered.contains(keyword));
        let mentions_crm = ["crm", "contact"]
            .iter()
            .any(|keyword| lowered.contains(keyword));
        let mentions_db = ["database", "query", "customer", "sales"]
            .iter()
            .any(|keyword| lowered.contains(keyword));
        let wants_summary = file_ref.is_some()
            || ["summar", "report"]
                .iter()
                .any(|keyword| lowered.contains(keyword));

        // Most specific template first
        let plan = if mentions_crm && wants_email {
            self.lookup_then_email(query)?
        } else if mentions_db && wants_email {
            self.query_then_email(query)?
        } else if wants_summary && wants_email {
            self.summarize_then_email(query, file_ref)?
        } else if mentions_db && wants_summary {
            self.query_then_summarize(query)?
        } else if wants_summary {
            self.summarize_only(query, file_ref)?
        } else {
            return Err(PlanningError::Unplannable(query.to_string()));
        };

        info!("Planned {} steps for query: {query}", plan.step_count());
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_registry;

    fn planner() -> TemplatePlanner {
        TemplatePlanner::new(Arc::new(default_registry().unwrap()))
    }

    #[tokio::test]
    async fn test_query_then_email_template() {
        let plan = planner()
            .generate("Query the customer database and email the result to ops", None)
            .await
            .unwrap();

        assert_eq!(plan.step_count(), 2);
        assert_eq!(plan.steps[0].tool_id, "query_database");
        assert_eq!(plan.steps[0].output_name, "rows");
        assert_eq!(plan.steps[1].tool_id, "send_email");
        // The email step inherits the tool's authorization gate
        assert!(plan.steps[1].requires_auth);
        assert!(!plan.steps[0].requires_auth);

        let body = plan.steps[1]
            .inputs
            .iter()
            .find(|input| input.name == "body")
            .unwrap();
        assert_eq!(
            body.value,
            InputValue::literal("Requested rows:\n\n${rows}")
        );
    }

    #[tokio::test]
    async fn test_crm_template_wins_over_database() {
        let plan = planner()
            .generate("Email our CRM contacts at the customer database team", None)
            .await
            .unwrap();
        assert_eq!(plan.steps[0].tool_id, "lookup_crm_contact");
        assert_eq!(plan.steps[1].tool_id, "send_email");
    }

    #[tokio::test]
    async fn test_file_ref_feeds_summarize_template() {
        let plan = planner()
            .generate("send me an overview of this", Some("leads.csv"))
            .await
            .unwrap();

        assert_eq!(plan.steps[0].tool_id, "summarize_data");
        assert_eq!(
            plan.steps[0].inputs[0].value,
            InputValue::literal("leads.csv")
        );
        assert_eq!(plan.steps[1].inputs[1].value, InputValue::step_output(0));
    }

    #[tokio::test]
    async fn test_query_then_summarize_without_email() {
        let plan = planner()
            .generate("summarize the customer database", None)
            .await
            .unwrap();
        assert_eq!(plan.steps[0].tool_id, "query_database");
        assert_eq!(plan.steps[1].tool_id, "summarize_data");
        assert_eq!(plan.steps[1].inputs[0].value, InputValue::step_output(0));
    }

    #[tokio::test]
    async fn test_summarize_only_single_step() {
        let plan = planner()
            .generate("give me a report on this file", Some("q3.csv"))
            .await
            .unwrap();
        assert_eq!(plan.step_count(), 1);
        assert_eq!(plan.steps[0].tool_id, "summarize_data");
    }

    #[tokio::test]
    async fn test_unmatched_query_is_unplannable() {
        let err = planner()
            .generate("restart the marketing cluster", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanningError::Unplannable(query) if query.contains("marketing")));
    }
}
