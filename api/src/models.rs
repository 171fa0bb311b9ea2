//! API Models Module
//!
//! Request and configuration types for the HTTP surface. Responses are
//! the core structures serialized as-is, so only the inbound shapes
//! live here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use runbook_core::clarification::Resolution;
use runbook_core::context::ExecutionContext;

/// Server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            host: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

/// Generate and store a plan for a query
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlanRequest {
    pub query: String,
    /// Uploaded data reference the plan's steps may consume
    #[serde(default)]
    pub file_ref: Option<String>,
}

/// Start executing a stored plan
#[derive(Debug, Clone, Deserialize)]
pub struct StartRunRequest {
    pub plan_id: Uuid,
    /// Ambient parameters tools may read (`recipient`, `uploaded_file`)
    #[serde(default)]
    pub params: HashMap<String, Value>,
    /// Pre-satisfied clarifications keyed by step index
    #[serde(default)]
    pub grants: HashMap<usize, Value>,
}

impl StartRunRequest {
    /// Execution context carrying the request's parameters and grants.
    pub fn context(&self) -> ExecutionContext {
        let mut context = ExecutionContext::new();
        for (name, value) in &self.params {
            context = context.with_param(name.clone(), value.clone());
        }
        for (step_index, value) in &self.grants {
            context = context.with_grant(*step_index, value.clone());
        }
        context
    }
}

/// Resume a suspended run with a clarification decision
#[derive(Debug, Clone, Deserialize)]
pub struct ResumeRequest {
    pub approved: bool,
    /// Credential or input value accompanying an approval
    #[serde(default)]
    pub value: Option<Value>,
    /// Explanation accompanying a denial
    #[serde(default)]
    pub reason: Option<String>,
}

impl ResumeRequest {
    pub fn resolution(&self) -> Resolution {
        if self.approved {
            Resolution::Approve {
                value: self.value.clone(),
            }
        } else {
            Resolution::Deny {
                reason: self.reason.clone(),
            }
        }
    }
}

/// Roll a run back to a target step
#[derive(Debug, Clone, Deserialize)]
pub struct RollbackRequest {
    /// Steps after this index are undone; the target itself is kept
    pub target_step_index: usize,
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8787);
    }

    #[test]
    fn test_start_run_request_builds_context() {
        let request: StartRunRequest = serde_json::from_value(json!({
            "plan_id": Uuid::new_v4(),
            "params": {"recipient": "ops@example.com"},
            "grants": {"1": true},
        }))
        .unwrap();

        let context = request.context();
        assert_eq!(context.param_str("recipient"), Some("ops@example.com"));
        assert!(context.has_grant(1));
        assert!(!context.has_grant(0));
    }

    #[test]
    fn test_resume_request_maps_to_resolution() {
        let approve = ResumeRequest {
            approved: true,
            value: Some(json!("token")),
            reason: None,
        };
        assert_eq!(
            approve.resolution(),
            Resolution::Approve {
                value: Some(json!("token"))
            }
        );

        let deny = ResumeRequest {
            approved: false,
            value: None,
            reason: Some("wrong recipient".to_string()),
        };
        assert_eq!(
            deny.resolution(),
            Resolution::Deny {
                reason: Some("wrong recipient".to_string())
            }
        );
    }
}
