//! Tool registry — identifier lookup over executable capabilities
//!
//! Tools are registered once at startup and the registry is shared
//! read-only for the lifetime of the process; definitions never change
//! mid-run. Each tool declares up front whether it needs just-in-time
//! authorization and whether its effect can be reversed, so the planner
//! and the rollback manager can interrogate capabilities without
//! invoking anything.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::run::StepResult;

/// Tool invocation errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing required input: {name}")]
    MissingInput { name: String },

    #[error("invalid input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    #[error("{0}")]
    Failed(String),

    #[error("tool '{0}' is not reversible")]
    NotReversible(String),
}

/// Integration category a tool belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Data,
    Email,
    Database,
    Crm,
    System,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Data => "data",
            ToolCategory::Email => "email",
            ToolCategory::Database => "database",
            ToolCategory::Crm => "crm",
            ToolCategory::System => "system",
        }
    }
}

/// Inputs for one invocation, resolved from the step's declared
/// parameters (references already replaced with recorded outputs)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    entries: Vec<(String, Value)>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        ResolvedInputs::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Fetch a required input, failing the invocation when absent.
    pub fn require(&self, name: &str) -> Result<&Value, ToolError> {
        self.get(name).ok_or_else(|| ToolError::MissingInput {
            name: name.to_string(),
        })
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ToolError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| ToolError::InvalidInput {
            name: name.to_string(),
            reason: "expected a string".to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for ResolvedInputs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        ResolvedInputs {
            entries: iter.into_iter().collect(),
        }
    }
}

/// An executable capability the engine can dispatch a step to
#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier steps name in `tool_id`
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory;

    /// Whether invoking this tool needs a just-in-time authorization;
    /// planners copy this onto the steps they emit.
    fn requires_auth(&self) -> bool {
        false
    }

    /// Whether the tool's effect can be reversed by `undo`.
    fn reversible(&self) -> bool {
        false
    }

    async fn invoke(
        &self,
        inputs: &ResolvedInputs,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolError>;

    /// Reverse the effect recorded in `result`. Only called when
    /// `reversible` returns true.
    async fn undo(&self, result: &StepResult) -> Result<(), ToolError> {
        let _ = result;
        Err(ToolError::NotReversible(self.id().to_string()))
    }
}

/// Registry entry surfaced to listings and planners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub description: String,
    pub category: ToolCategory,
    pub requires_auth: bool,
    pub reversible: bool,
}

/// Maps tool identifiers to capabilities
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    /// Register a tool under its own identifier. Last registration wins
    /// when an identifier repeats.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(tool_id).cloned()
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All registered tools as listing entries, sorted by identifier.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                id: tool.id().to_string(),
                description: tool.description().to_string(),
                category: tool.category(),
                requires_auth: tool.requires_auth(),
                reversible: tool.reversible(),
            })
            .collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    /// Tools in one category, sorted by identifier.
    pub fn specs_in_category(&self, category: ToolCategory) -> Vec<ToolSpec> {
        self.specs()
            .into_iter()
            .filter(|spec| spec.category == category)
            .collect()
    }
}
