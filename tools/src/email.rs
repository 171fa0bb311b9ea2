//! Email Tool
//!
//! Demo-mode email delivery: the message is rendered and logged, never
//! handed to a network. The sender address comes from `EMAIL_FROM`, the
//! recipient from the `to` input or the context's `recipient` parameter.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use runbook_core::context::ExecutionContext;
use runbook_core::registry::{ResolvedInputs, Tool, ToolCategory, ToolError};

const DEFAULT_FROM: &str = "no-reply@example.com";
const DEFAULT_SUBJECT: &str = "Runbook notification";

/// Renders and logs an outgoing message without delivering it
///
/// Invocation is gated on a just-in-time authorization, so plans using
/// this tool suspend at the email step until the caller approves it.
pub struct SendEmailTool {
    from: String,
}

impl SendEmailTool {
    pub fn new(from: impl Into<String>) -> Self {
        SendEmailTool { from: from.into() }
    }

    /// Sender address from `EMAIL_FROM`, with a no-reply default.
    pub fn from_env() -> Self {
        let from = std::env::var("EMAIL_FROM").unwrap_or_else(|_| DEFAULT_FROM.to_string());
        SendEmailTool { from }
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    fn id(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email (demo mode: rendered and logged, not delivered)"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Email
    }

    fn requires_auth(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        inputs: &ResolvedInputs,
        ctx: &ExecutionContext,
    ) -> Result<Value, ToolError> {
        let to = inputs
            .get_str("to")
            .or_else(|| ctx.param_str("recipient"))
            .ok_or_else(|| ToolError::MissingInput {
                name: "to".to_string(),
            })?
            .to_string();
        let subject = inputs.get_str("subject").unwrap_or(DEFAULT_SUBJECT).to_string();
        let body = render_body(inputs.require("body")?);

        info!(
            "send_email (demo mode): to={to} subject={subject:?} body_chars={}",
            body.chars().count()
        );
        Ok(json!({
            "status": "mocked",
            "to": to,
            "from": self.from,
            "subject": subject,
            "body_chars": body.chars().count(),
        }))
    }
}

/// Strings pass through; a result object carrying a `summary` string is
/// reduced to it, so summarize-then-email plans deliver readable bodies.
fn render_body(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        Value::Object(fields) => match fields.get("summary").and_then(Value::as_str) {
            Some(summary) => summary.to_string(),
            None => serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string()),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(entries: Vec<(&str, Value)>) -> ResolvedInputs {
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    #[tokio::test]
    async fn test_mocked_delivery_fields() {
        let tool = SendEmailTool::new("workbench@example.com");
        let out = tool
            .invoke(
                &inputs(vec![
                    ("to", json!("ops@example.com")),
                    ("subject", json!("Sales Summary")),
                    ("body", json!("Total sales: 2650 (from 2 days)")),
                ]),
                &ExecutionContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(out["status"], json!("mocked"));
        assert_eq!(out["to"], json!("ops@example.com"));
        assert_eq!(out["from"], json!("workbench@example.com"));
        assert_eq!(out["subject"], json!("Sales Summary"));
        assert_eq!(out["body_chars"], json!(31));
    }

    #[tokio::test]
    async fn test_recipient_falls_back_to_context() {
        let tool = SendEmailTool::new(DEFAULT_FROM);
        let ctx = ExecutionContext::new().with_param("recipient", "sam@example.com");
        let out = tool
            .invoke(&inputs(vec![("body", json!("hello"))]), &ctx)
            .await
            .unwrap();

        assert_eq!(out["to"], json!("sam@example.com"));
        assert_eq!(out["subject"], json!(DEFAULT_SUBJECT));
    }

    #[tokio::test]
    async fn test_missing_recipient_and_body_rejected() {
        let tool = SendEmailTool::new(DEFAULT_FROM);
        let err = tool
            .invoke(
                &inputs(vec![("body", json!("hello"))]),
                &ExecutionContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingInput { name } if name == "to"));

        let err = tool
            .invoke(
                &inputs(vec![("to", json!("ops@example.com"))]),
                &ExecutionContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingInput { name } if name == "body"));
    }

    #[test]
    fn test_body_rendering() {
        assert_eq!(render_body(&json!("plain text")), "plain text");
        // A summarizer result is reduced to its summary line
        assert_eq!(
            render_body(&json!({"summary": "2 rows", "raw": [1, 2]})),
            "2 rows"
        );
        // Anything else is serialized
        assert!(render_body(&json!({"rows": 2})).contains("\"rows\": 2"));
        assert_eq!(render_body(&json!(7)), "7");
    }

    #[test]
    fn test_auth_gate_declared() {
        assert!(SendEmailTool::new(DEFAULT_FROM).requires_auth());
        assert!(!SendEmailTool::new(DEFAULT_FROM).reversible());
    }
}
