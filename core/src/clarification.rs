//! Clarification states — human-in-the-loop suspension as first-class data
//!
//! A run carries exactly one clarification slot. Execution moves it to
//! `Pending` when a step's requirement is unmet, and only an explicit
//! resume decision moves it on to `Resolved` or `Denied`. There is no
//! timeout path: a suspended run waits for as long as the caller lets it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of out-of-band input a step is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationKind {
    /// Missing credential or permission grant
    Authorization,

    /// Explicit human sign-off before a consequential action
    Approval,

    /// A value the plan could not supply itself
    Input,
}

impl ClarificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClarificationKind::Authorization => "authorization",
            ClarificationKind::Approval => "approval",
            ClarificationKind::Input => "input",
        }
    }
}

/// The caller's decision when resuming a suspended run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Resolution {
    /// Supply the requirement; `value` carries a credential or input when
    /// the step needs one, `null` for a plain approval.
    Approve {
        #[serde(default)]
        value: Option<Value>,
    },

    /// Reject the requirement; the run fails at the suspended step.
    Deny {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Clarification slot on a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Clarification {
    /// No step is waiting on anything
    #[default]
    NotRequired,

    /// Execution halted at `step_index` until the caller decides
    Pending {
        step_index: usize,
        kind: ClarificationKind,
        question: String,
        requested_at: DateTime<Utc>,
    },

    /// The most recent requirement was satisfied
    Resolved {
        step_index: usize,
        value: Value,
        resolved_at: DateTime<Utc>,
    },

    /// The most recent requirement was explicitly rejected
    Denied {
        step_index: usize,
        reason: Option<String>,
        denied_at: DateTime<Utc>,
    },
}

impl Clarification {
    /// Enter `Pending` for the given step. A run never queues two
    /// suspensions; the engine halts at the first unmet requirement, so
    /// the previous state is always `NotRequired` or `Resolved`.
    pub fn pending(step_index: usize, kind: ClarificationKind, question: impl Into<String>) -> Self {
        Clarification::Pending {
            step_index,
            kind,
            question: question.into(),
            requested_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Clarification::Pending { .. })
    }

    /// Step the run is suspended at, when pending.
    pub fn pending_step(&self) -> Option<usize> {
        match self {
            Clarification::Pending { step_index, .. } => Some(*step_index),
            _ => None,
        }
    }

    /// When the pending request was raised, for staleness reporting.
    pub fn pending_since(&self) -> Option<DateTime<Utc>> {
        match self {
            Clarification::Pending { requested_at, .. } => Some(*requested_at),
            _ => None,
        }
    }

    /// Apply a resume decision to a pending clarification. Returns the
    /// successor state, or `None` when nothing is pending.
    pub fn apply(&self, resolution: &Resolution) -> Option<Clarification> {
        let step_index = self.pending_step()?;
        Some(match resolution {
            Resolution::Approve { value } => Clarification::Resolved {
                step_index,
                value: value.clone().unwrap_or(Value::Bool(true)),
                resolved_at: Utc::now(),
            },
            Resolution::Deny { reason } => Clarification::Denied {
                step_index,
                reason: reason.clone(),
                denied_at: Utc::now(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_not_required() {
        assert_eq!(Clarification::default(), Clarification::NotRequired);
        assert!(!Clarification::default().is_pending());
    }

    #[test]
    fn test_pending_tracks_step_and_time() {
        let clarification =
            Clarification::pending(3, ClarificationKind::Authorization, "email credentials?");
        assert!(clarification.is_pending());
        assert_eq!(clarification.pending_step(), Some(3));
        assert!(clarification.pending_since().is_some());
    }

    #[test]
    fn test_approve_resolves_with_value() {
        let pending = Clarification::pending(1, ClarificationKind::Input, "recipient?");
        let resolved = pending
            .apply(&Resolution::Approve {
                value: Some(json!("ops@example.com")),
            })
            .unwrap();
        match resolved {
            Clarification::Resolved { step_index, value, .. } => {
                assert_eq!(step_index, 1);
                assert_eq!(value, json!("ops@example.com"));
            }
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn test_approve_without_value_records_true() {
        let pending = Clarification::pending(0, ClarificationKind::Approval, "send it?");
        let resolved = pending.apply(&Resolution::Approve { value: None }).unwrap();
        match resolved {
            Clarification::Resolved { value, .. } => assert_eq!(value, Value::Bool(true)),
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn test_deny_records_reason() {
        let pending = Clarification::pending(2, ClarificationKind::Approval, "send it?");
        let denied = pending
            .apply(&Resolution::Deny {
                reason: Some("wrong recipient".to_string()),
            })
            .unwrap();
        match denied {
            Clarification::Denied { step_index, reason, .. } => {
                assert_eq!(step_index, 2);
                assert_eq!(reason.as_deref(), Some("wrong recipient"));
            }
            other => panic!("expected denied, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_requires_pending() {
        let resolution = Resolution::Approve { value: None };
        assert!(Clarification::NotRequired.apply(&resolution).is_none());

        let resolved = Clarification::pending(0, ClarificationKind::Approval, "q")
            .apply(&resolution)
            .unwrap();
        assert!(resolved.apply(&resolution).is_none());
    }
}
