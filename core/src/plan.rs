//! Plan types — immutable step sequences produced by a planner
//!
//! A plan is created once, validated at construction, and never mutated.
//! Steps carry everything the engine needs: the tool to invoke, named
//! inputs (literals or references to earlier outputs), and the
//! clarification requirement that gates execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clarification::ClarificationKind;

/// Plan construction errors
///
/// These are contract violations raised when a plan is built, never
/// during execution.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("step {step} depends on step {depends_on}, which does not precede it")]
    DependencyOutOfOrder { step: usize, depends_on: usize },
}

/// One named parameter of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    /// Parameter name as the tool expects it
    pub name: String,

    /// Literal value or reference to an earlier step's output
    pub value: InputValue,
}

impl StepInput {
    pub fn new(name: impl Into<String>, value: InputValue) -> Self {
        StepInput {
            name: name.into(),
            value,
        }
    }
}

/// A step input value: literal, or a reference resolved during execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputValue {
    /// Passed to the tool unchanged
    Literal { value: Value },

    /// The recorded output of an earlier step, by position
    StepOutput { step: usize },

    /// The recorded output of an earlier step, by its `output_name`
    NamedOutput { name: String },
}

impl InputValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        InputValue::Literal {
            value: value.into(),
        }
    }

    pub fn step_output(step: usize) -> Self {
        InputValue::StepOutput { step }
    }

    pub fn named_output(name: impl Into<String>) -> Self {
        InputValue::NamedOutput { name: name.into() }
    }

    /// Parse the textual reference forms used in plan descriptions:
    /// `output of step N` and `${name}`. Anything else is a literal string.
    pub fn parse(text: &str) -> Self {
        if let Some(rest) = text.strip_prefix("output of step ") {
            if let Ok(step) = rest.trim().parse::<usize>() {
                return InputValue::StepOutput { step };
            }
        }
        if let Some(inner) = text.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
            if !inner.is_empty() && !inner.contains("${") {
                return InputValue::NamedOutput {
                    name: inner.to_string(),
                };
            }
        }
        InputValue::Literal {
            value: Value::String(text.to_string()),
        }
    }
}

/// Single step in a plan
///
/// Each step represents one tool invocation. The step's position in the
/// plan is its index; it is not stored on the step itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Human-readable description of what the step does
    pub task: String,

    /// Tool identifier, resolved against the registry at execution time
    pub tool_id: String,

    /// Ordered named parameters
    pub inputs: Vec<StepInput>,

    /// Symbolic name under which this step's result is stored
    pub output_name: String,

    /// Indices of earlier steps this step depends on
    #[serde(default)]
    pub depends_on: Vec<usize>,

    /// Step cannot proceed without a just-in-time authorization
    #[serde(default)]
    pub requires_auth: bool,

    /// Step cannot proceed without this kind of out-of-band resolution
    #[serde(default)]
    pub clarification_type: Option<ClarificationKind>,
}

impl Step {
    pub fn new(
        task: impl Into<String>,
        tool_id: impl Into<String>,
        inputs: Vec<StepInput>,
        output_name: impl Into<String>,
    ) -> Self {
        Step {
            task: task.into(),
            tool_id: tool_id.into(),
            inputs,
            output_name: output_name.into(),
            depends_on: Vec::new(),
            requires_auth: false,
            clarification_type: None,
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<usize>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn with_clarification(mut self, kind: ClarificationKind) -> Self {
        self.clarification_type = Some(kind);
        self
    }

    /// The clarification this step needs before it may run, if any.
    ///
    /// `requires_auth` is shorthand for an authorization-kind
    /// clarification and takes precedence over `clarification_type`.
    pub fn clarification_requirement(&self) -> Option<ClarificationKind> {
        if self.requires_auth {
            return Some(ClarificationKind::Authorization);
        }
        self.clarification_type
    }
}

/// Ordered, immutable sequence of steps generated from a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier, assigned at creation
    pub id: Uuid,

    /// Original natural-language request, kept opaque
    pub query: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Steps in execution order
    pub steps: Vec<Step>,
}

impl Plan {
    /// Build a plan, validating the dependency ordering invariant.
    ///
    /// `depends_on` entries must reference strictly earlier steps; forward
    /// and self references are rejected here so they can never surface as
    /// runtime faults.
    pub fn new(query: impl Into<String>, steps: Vec<Step>) -> Result<Self, PlanError> {
        Plan::with_id(Uuid::new_v4(), query, Utc::now(), steps)
    }

    /// Rebuild a plan with a known identity (used when loading from a
    /// store). Runs the same validation as `new`.
    pub fn with_id(
        id: Uuid,
        query: impl Into<String>,
        created_at: DateTime<Utc>,
        steps: Vec<Step>,
    ) -> Result<Self, PlanError> {
        for (index, step) in steps.iter().enumerate() {
            for &dep in &step.depends_on {
                if dep >= index {
                    return Err(PlanError::DependencyOutOfOrder {
                        step: index,
                        depends_on: dep,
                    });
                }
            }
        }

        Ok(Plan {
            id,
            query: query.into(),
            created_at,
            steps,
        })
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Index of the latest step before `before` whose `output_name`
    /// matches, for resolving named references.
    pub fn named_step_before(&self, name: &str, before: usize) -> Option<usize> {
        self.steps
            .iter()
            .take(before)
            .enumerate()
            .rev()
            .find(|(_, step)| step.output_name == name)
            .map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(tool: &str, output: &str) -> Step {
        Step::new(format!("run {tool}"), tool, vec![], output)
    }

    #[test]
    fn test_plan_accepts_backward_dependencies() {
        let steps = vec![
            step("query_database", "rows"),
            step("send_email", "delivery").with_depends_on(vec![0]),
        ];
        let plan = Plan::new("email the query results", steps).unwrap();
        assert_eq!(plan.step_count(), 2);
        assert_eq!(plan.steps[1].depends_on, vec![0]);
    }

    #[test]
    fn test_plan_rejects_forward_dependency() {
        let steps = vec![
            step("query_database", "rows").with_depends_on(vec![1]),
            step("send_email", "delivery"),
        ];
        let err = Plan::new("bad plan", steps).unwrap_err();
        match err {
            PlanError::DependencyOutOfOrder { step, depends_on } => {
                assert_eq!(step, 0);
                assert_eq!(depends_on, 1);
            }
        }
    }

    #[test]
    fn test_plan_rejects_self_dependency() {
        let steps = vec![
            step("query_database", "rows"),
            step("send_email", "delivery").with_depends_on(vec![1]),
        ];
        assert!(Plan::new("bad plan", steps).is_err());
    }

    #[test]
    fn test_empty_plan_is_valid() {
        let plan = Plan::new("nothing to do", vec![]).unwrap();
        assert_eq!(plan.step_count(), 0);
    }

    #[test]
    fn test_input_value_parse_step_reference() {
        assert_eq!(
            InputValue::parse("output of step 2"),
            InputValue::StepOutput { step: 2 }
        );
        assert_eq!(
            InputValue::parse("${rows}"),
            InputValue::NamedOutput {
                name: "rows".to_string()
            }
        );
        assert_eq!(
            InputValue::parse("plain text"),
            InputValue::Literal {
                value: json!("plain text")
            }
        );
        // Malformed references fall back to literal strings
        assert_eq!(
            InputValue::parse("output of step two"),
            InputValue::Literal {
                value: json!("output of step two")
            }
        );
    }

    #[test]
    fn test_clarification_requirement_precedence() {
        let auth = step("send_email", "delivery").with_requires_auth(true);
        assert_eq!(
            auth.clarification_requirement(),
            Some(ClarificationKind::Authorization)
        );

        let approval = step("send_email", "delivery")
            .with_clarification(ClarificationKind::Approval);
        assert_eq!(
            approval.clarification_requirement(),
            Some(ClarificationKind::Approval)
        );

        let both = step("send_email", "delivery")
            .with_requires_auth(true)
            .with_clarification(ClarificationKind::Approval);
        assert_eq!(
            both.clarification_requirement(),
            Some(ClarificationKind::Authorization)
        );

        assert_eq!(step("query_database", "rows").clarification_requirement(), None);
    }

    #[test]
    fn test_named_step_before_prefers_latest() {
        let steps = vec![
            step("query_database", "rows"),
            step("summarize_data", "rows"),
            step("send_email", "delivery"),
        ];
        let plan = Plan::new("shadowed names", steps).unwrap();
        assert_eq!(plan.named_step_before("rows", 2), Some(1));
        assert_eq!(plan.named_step_before("rows", 1), Some(0));
        assert_eq!(plan.named_step_before("rows", 0), None);
        assert_eq!(plan.named_step_before("missing", 2), None);
    }

    #[test]
    fn test_plan_serde_round_trip() {
        let steps = vec![Step::new(
            "look up the contact",
            "lookup_crm_contact",
            vec![StepInput::new("name", InputValue::literal("Dana Singh"))],
            "contact",
        )];
        let plan = Plan::new("find dana", steps).unwrap();
        let encoded = serde_json::to_string(&plan).unwrap();
        let decoded: Plan = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, plan);
    }
}
