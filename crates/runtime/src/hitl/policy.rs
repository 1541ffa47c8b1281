//! Policy engine
//!
//! Pure evaluation of a proposed action against static policy
//! configuration. The first matching rule wins, and tool-based rules
//! always come before confidence- and loop-based heuristics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::reasoning::loop_types::{CognitionOutput, ProposedAction};

/// Gating strength applied to a proposed action, least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionLevel {
    None,
    Notify,
    Confirm,
    Approve,
    Block,
}

impl InterventionLevel {
    /// Whether this level freezes the loop until a human decides.
    pub fn requires_freeze(self) -> bool {
        matches!(self, Self::Confirm | Self::Approve | Self::Block)
    }
}

impl fmt::Display for InterventionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "NONE",
            Self::Notify => "NOTIFY",
            Self::Confirm => "CONFIRM",
            Self::Approve => "APPROVE",
            Self::Block => "BLOCK",
        };
        f.write_str(s)
    }
}

/// Static policy configuration (`[policy]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Tools that require explicit approval.
    pub high_risk_tools: BTreeSet<String>,
    /// Tools that always require confirmation.
    pub always_confirm_tools: BTreeSet<String>,
    /// Require approval for actions flagged final.
    pub confirm_on_final_action: bool,
    /// Confirm when cognition confidence falls below this value.
    pub confirm_on_confidence_below: f64,
    /// Notify once this many cycles have completed.
    pub confirm_after_n_loops: u64,
    /// Tools that always freeze at `BLOCK`.
    pub blocked_tools: BTreeSet<String>,
    /// Notify when a proposal cites no evidence.
    pub notify_on_missing_evidence: bool,
}

fn tool_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            high_risk_tools: tool_set(&["send_email", "cancel_trip", "make_payment", "delete_data"]),
            always_confirm_tools: tool_set(&["generate_image"]),
            confirm_on_final_action: true,
            confirm_on_confidence_below: 0.7,
            confirm_after_n_loops: 10,
            blocked_tools: BTreeSet::new(),
            notify_on_missing_evidence: false,
        }
    }
}

impl PolicyConfig {
    /// A configuration under which no built-in rule ever matches.
    pub fn permissive() -> Self {
        Self {
            high_risk_tools: BTreeSet::new(),
            always_confirm_tools: BTreeSet::new(),
            confirm_on_final_action: false,
            confirm_on_confidence_below: 0.0,
            confirm_after_n_loops: u64::MAX,
            blocked_tools: BTreeSet::new(),
            notify_on_missing_evidence: false,
        }
    }

    pub fn with_high_risk(mut self, tools: &[&str]) -> Self {
        self.high_risk_tools = tool_set(tools);
        self
    }

    pub fn with_always_confirm(mut self, tools: &[&str]) -> Self {
        self.always_confirm_tools = tool_set(tools);
        self
    }

    pub fn with_blocked(mut self, tools: &[&str]) -> Self {
        self.blocked_tools = tool_set(tools);
        self
    }
}

/// Everything a policy decision may depend on.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub action: &'a ProposedAction,
    /// Cycles completed before the current one.
    pub loop_index: u64,
    pub confidence: f64,
    pub is_final: bool,
    pub evidence_refs: &'a [String],
}

impl<'a> PolicyInput<'a> {
    pub fn from_output(output: &'a CognitionOutput, loop_index: u64) -> Self {
        Self {
            action: &output.proposed_action,
            loop_index,
            confidence: output.confidence,
            is_final: output.is_final,
            evidence_refs: &output.evidence_refs,
        }
    }
}

/// Level plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub level: InterventionLevel,
    pub reason: String,
}

impl PolicyVerdict {
    pub fn new(level: InterventionLevel, reason: impl Into<String>) -> Self {
        Self {
            level,
            reason: reason.into(),
        }
    }

    pub fn none() -> Self {
        Self::new(InterventionLevel::None, "No intervention required")
    }
}

/// Extra rule consulted when no built-in rule matched. Must be pure.
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, input: &PolicyInput<'_>) -> Option<PolicyVerdict>;
}

/// Immutable after construction; share it behind `Arc`.
#[derive(Clone)]
pub struct PolicyEngine {
    config: Arc<PolicyConfig>,
    rules: Vec<Arc<dyn PolicyRule>>,
    enabled: bool,
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("config", &self.config)
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl PolicyEngine {
    pub fn new(config: impl Into<Arc<PolicyConfig>>) -> Self {
        Self {
            config: config.into(),
            rules: Vec::new(),
            enabled: true,
        }
    }

    /// An engine that always returns `NONE`.
    pub fn disabled() -> Self {
        Self {
            config: Arc::new(PolicyConfig::permissive()),
            rules: Vec::new(),
            enabled: false,
        }
    }

    pub fn with_rule(mut self, rule: Arc<dyn PolicyRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn evaluate(&self, input: &PolicyInput<'_>) -> PolicyVerdict {
        if !self.enabled {
            return PolicyVerdict::new(InterventionLevel::None, "HITL disabled");
        }

        let tool = input.action.tool_name.as_str();
        let cfg = &self.config;

        if cfg.blocked_tools.contains(tool) {
            return PolicyVerdict::new(InterventionLevel::Block, format!("Tool '{tool}' is blocked"));
        }
        if cfg.high_risk_tools.contains(tool) {
            return PolicyVerdict::new(
                InterventionLevel::Approve,
                format!("High-risk tool: {tool}"),
            );
        }
        if cfg.always_confirm_tools.contains(tool) {
            return PolicyVerdict::new(
                InterventionLevel::Confirm,
                format!("Tool requires confirmation: {tool}"),
            );
        }
        if input.confidence < cfg.confirm_on_confidence_below {
            return PolicyVerdict::new(
                InterventionLevel::Confirm,
                format!(
                    "Low confidence: {:.2} < {:.2}",
                    input.confidence, cfg.confirm_on_confidence_below
                ),
            );
        }
        if input.loop_index >= cfg.confirm_after_n_loops {
            return PolicyVerdict::new(
                InterventionLevel::Notify,
                format!(
                    "Loop {} reached threshold {}",
                    input.loop_index, cfg.confirm_after_n_loops
                ),
            );
        }
        if input.is_final && cfg.confirm_on_final_action {
            return PolicyVerdict::new(InterventionLevel::Approve, "Final action requires approval");
        }
        if cfg.notify_on_missing_evidence && input.evidence_refs.is_empty() {
            return PolicyVerdict::new(InterventionLevel::Notify, "No evidence cited");
        }

        for rule in &self.rules {
            if let Some(verdict) = rule.evaluate(input) {
                tracing::debug!(rule = rule.name(), level = %verdict.level, "Custom policy rule matched");
                return verdict;
            }
        }

        PolicyVerdict::none()
    }
}
