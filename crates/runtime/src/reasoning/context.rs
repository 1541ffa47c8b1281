//! Task-scoped loop context
//!
//! A typed mapping with a small closed set of well-known keys and an open
//! extension bag. Mutated only through `ContextPatch`, so every change to
//! what the cognition engine sees has a named cause.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::reasoning::loop_types::ProposedAction;

/// Retry guidance injected after a human rejection.
pub const DEFAULT_RETRY_GUIDANCE: &str = "Consider alternative approaches based on human feedback";

/// What the cognition engine sees on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// The task description.
    pub task: String,
    /// Static evidence blob produced by retrieval.
    #[serde(default)]
    pub evidence: serde_json::Value,
    /// Result of the most recent successful action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_result: Option<serde_json::Value>,
    /// Failure reason of the most recent failed action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_failure: Option<String>,
    /// Reason the control validator rejected the most recent proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_control_rejection: Option<String>,
    /// Human rejection feedback, visible to the next cognition call only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_feedback: Option<HumanFeedback>,
    /// Open extension bag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// Feedback from a virtual rejection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanFeedback {
    pub human_rejected: bool,
    pub rejection_reason: String,
    pub retry_guidance: String,
    pub previous_proposal: ProposedAction,
}

/// A single named mutation of the task context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextPatch {
    /// A human rejected the pending action.
    HumanRejection {
        rejection_reason: String,
        retry_guidance: String,
        previous_proposal: ProposedAction,
    },
    /// The control validator rejected the proposal.
    ControlRejection { reason: String },
    /// An action executed successfully.
    ActionResult { result: serde_json::Value },
    /// An action failed during execution.
    ActionFailure { reason: String },
    /// Ad hoc key in the extension bag.
    Extension {
        key: String,
        value: serde_json::Value,
    },
}

impl TaskContext {
    pub fn new(task: impl Into<String>, evidence: serde_json::Value) -> Self {
        Self {
            task: task.into(),
            evidence,
            ..Self::default()
        }
    }

    /// Apply a patch.
    pub fn apply(&mut self, patch: ContextPatch) {
        match patch {
            ContextPatch::HumanRejection {
                rejection_reason,
                retry_guidance,
                previous_proposal,
            } => {
                self.human_feedback = Some(HumanFeedback {
                    human_rejected: true,
                    rejection_reason,
                    retry_guidance,
                    previous_proposal,
                });
            }
            ContextPatch::ControlRejection { reason } => {
                self.last_control_rejection = Some(reason);
            }
            ContextPatch::ActionResult { result } => {
                self.last_action_result = Some(result);
                self.last_action_failure = None;
                self.last_control_rejection = None;
            }
            ContextPatch::ActionFailure { reason } => {
                self.last_action_failure = Some(reason);
            }
            ContextPatch::Extension { key, value } => {
                self.extensions.insert(key, value);
            }
        }
    }

    /// Whether the next cognition call will see a human rejection.
    pub fn human_rejected(&self) -> bool {
        self.human_feedback
            .as_ref()
            .is_some_and(|f| f.human_rejected)
    }

    /// Drop one-shot human feedback once cognition has consumed it.
    pub fn clear_human_feedback(&mut self) -> Option<HumanFeedback> {
        self.human_feedback.take()
    }
}

/// Mutable loop state. Owned by the controller, one per task run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopContext {
    /// Completed cycles. Incremented exactly once per cycle.
    pub loop_counter: u64,
    pub context: TaskContext,
    pub done: bool,
}

impl LoopContext {
    pub fn new(context: TaskContext) -> Self {
        Self {
            loop_counter: 0,
            context,
            done: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_rejection_patch_sets_feedback() {
        let mut ctx = TaskContext::new("plan a trip", serde_json::json!({}));
        assert!(!ctx.human_rejected());

        ctx.apply(ContextPatch::HumanRejection {
            rejection_reason: "wrong address".into(),
            retry_guidance: DEFAULT_RETRY_GUIDANCE.into(),
            previous_proposal: ProposedAction::new("send_email"),
        });
        assert!(ctx.human_rejected());

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["human_feedback"]["human_rejected"], true);
        assert_eq!(json["human_feedback"]["rejection_reason"], "wrong address");

        let feedback = ctx.clear_human_feedback().unwrap();
        assert_eq!(feedback.previous_proposal.tool_name, "send_email");
        assert!(!ctx.human_rejected());
    }

    #[test]
    fn test_action_result_clears_stale_failures() {
        let mut ctx = TaskContext::default();
        ctx.apply(ContextPatch::ControlRejection {
            reason: "missing argument".into(),
        });
        ctx.apply(ContextPatch::ActionFailure {
            reason: "timeout".into(),
        });
        ctx.apply(ContextPatch::ActionResult {
            result: serde_json::json!("ok"),
        });
        assert!(ctx.last_control_rejection.is_none());
        assert!(ctx.last_action_failure.is_none());
        assert_eq!(ctx.last_action_result, Some(serde_json::json!("ok")));
    }

    #[test]
    fn test_extension_patch() {
        let mut ctx = TaskContext::default();
        ctx.apply(ContextPatch::Extension {
            key: "destination".into(),
            value: serde_json::json!("Miami"),
        });
        assert_eq!(ctx.extensions["destination"], "Miami");
    }
}
