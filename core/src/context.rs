//! Execution context — ambient parameters, clarification grants,
//! cooperative cancellation
//!
//! The context travels with a run: ambient parameters (a recipient
//! address, an uploaded-file reference) are supplied by the caller at
//! start, grants accumulate as clarifications are resolved, and both are
//! persisted on the run record so a suspended run can resume in a fresh
//! process. The cancellation flag is session-local and never persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shared handle for cancelling a run between steps
///
/// Cancellation is cooperative: the engine checks the flag at the top of
/// the per-step loop, so a step already dispatched to a tool runs to
/// completion before cancellation takes effect.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        CancellationFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ambient execution state for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Caller-supplied parameters tools may read (e.g. `recipient`,
    /// `uploaded_file`)
    #[serde(default)]
    params: HashMap<String, Value>,

    /// Resolved clarification values keyed by step index
    #[serde(default)]
    grants: HashMap<usize, Value>,

    #[serde(skip, default)]
    cancel: CancellationFlag,
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.grants == other.grants
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        ExecutionContext::default()
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Pre-satisfy a step's clarification, as when the caller already
    /// holds the credential or approval a run would otherwise suspend for.
    pub fn with_grant(mut self, step_index: usize, value: Value) -> Self {
        self.grants.insert(step_index, value);
        self
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Convenience accessor for string-valued parameters.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    pub fn grant(&mut self, step_index: usize, value: Value) {
        self.grants.insert(step_index, value);
    }

    pub fn has_grant(&self, step_index: usize) -> bool {
        self.grants.contains_key(&step_index)
    }

    pub fn grant_value(&self, step_index: usize) -> Option<&Value> {
        self.grants.get(&step_index)
    }

    /// Handle callers keep to request cancellation of an in-flight run.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
