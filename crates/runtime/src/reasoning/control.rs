//! Control validation
//!
//! Static safety checks on a proposed action before any HITL gating:
//! the tool must be registered, required arguments present, and no
//! forbidden-argument rule may match. Failures are never fatal; the
//! controller turns them into a context patch for the next cycle.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::reasoning::loop_types::{CognitionOutput, ProposedAction};
use crate::reasoning::memory::Memory;

/// Result of a control check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlVerdict {
    Pass,
    Fail { reason: String },
}

impl ControlVerdict {
    fn fail(reason: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// A rule rejecting an argument value that matches a pattern.
#[derive(Debug, Clone)]
pub struct ForbiddenRule {
    pub argument: String,
    pub pattern: Regex,
    pub reason: String,
}

impl ForbiddenRule {
    pub fn compile(config: &ForbiddenRuleConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            argument: config.argument.clone(),
            pattern: Regex::new(&config.pattern)?,
            reason: config.reason.clone(),
        })
    }

    fn matches(&self, value: &serde_json::Value) -> bool {
        match value {
            serde_json::Value::String(s) => self.pattern.is_match(s),
            other => self.pattern.is_match(&other.to_string()),
        }
    }
}

/// Static declaration of a registered tool.
#[derive(Debug, Clone, Default)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub required_args: Vec<String>,
    pub forbidden: Vec<ForbiddenRule>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_required(mut self, args: &[&str]) -> Self {
        self.required_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_forbidden(mut self, rule: ForbiddenRule) -> Self {
        self.forbidden.push(rule);
        self
    }
}

/// `[control.tools.<name>.forbidden]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForbiddenRuleConfig {
    pub argument: String,
    pub pattern: String,
    pub reason: String,
}

/// `[control.tools.<name>]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRuleConfig {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub forbidden: Vec<ForbiddenRuleConfig>,
}

/// `[control]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Fail proposals that cite no evidence.
    #[serde(default)]
    pub require_evidence_citations: bool,
    /// Fail proposals whose result is already in the evidence cache.
    #[serde(default)]
    pub reject_redundant_calls: bool,
    /// Extra per-tool rules layered on top of the registered specs.
    #[serde(default)]
    pub tools: BTreeMap<String, ToolRuleConfig>,
}

/// Stateless validator over registered tool specs.
#[derive(Debug, Clone, Default)]
pub struct ControlValidator {
    tools: HashMap<String, ToolSpec>,
    require_evidence_citations: bool,
    reject_redundant_calls: bool,
}

impl ControlValidator {
    pub fn new(specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        Self {
            tools: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
            require_evidence_citations: false,
            reject_redundant_calls: false,
        }
    }

    /// Build from registered specs plus configured rules.
    pub fn from_config(
        specs: impl IntoIterator<Item = ToolSpec>,
        config: &ControlConfig,
    ) -> Result<Self, regex::Error> {
        let mut validator = Self::new(specs);
        validator.require_evidence_citations = config.require_evidence_citations;
        validator.reject_redundant_calls = config.reject_redundant_calls;

        for (name, rules) in &config.tools {
            let Some(spec) = validator.tools.get_mut(name) else {
                tracing::warn!(tool = %name, "Control rules configured for unregistered tool");
                continue;
            };
            for arg in &rules.required {
                if !spec.required_args.contains(arg) {
                    spec.required_args.push(arg.clone());
                }
            }
            for rule in &rules.forbidden {
                spec.forbidden.push(ForbiddenRule::compile(rule)?);
            }
        }
        Ok(validator)
    }

    pub fn is_registered(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    /// Static checks on a single action.
    pub fn validate(&self, action: &ProposedAction) -> ControlVerdict {
        let Some(spec) = self.tools.get(&action.tool_name) else {
            return ControlVerdict::fail(format!("Tool '{}' is not registered", action.tool_name));
        };

        let missing: Vec<&str> = spec
            .required_args
            .iter()
            .filter(|arg| {
                action
                    .arguments
                    .get(arg.as_str())
                    .map_or(true, serde_json::Value::is_null)
            })
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return ControlVerdict::fail(format!(
                "Missing required argument(s) for '{}': {}",
                spec.name,
                missing.join(", ")
            ));
        }

        for rule in &spec.forbidden {
            if let Some(value) = action.arguments.get(&rule.argument) {
                if rule.matches(value) {
                    return ControlVerdict::fail(format!(
                        "Forbidden value for '{}.{}': {}",
                        spec.name, rule.argument, rule.reason
                    ));
                }
            }
        }

        ControlVerdict::Pass
    }

    /// Full control step: output sanity, citations, static rules, redundancy.
    pub fn validate_output(&self, output: &CognitionOutput, memory: &Memory) -> ControlVerdict {
        if !(0.0..=1.0).contains(&output.confidence) {
            return ControlVerdict::fail(format!(
                "Confidence {} is outside [0, 1]",
                output.confidence
            ));
        }
        if self.require_evidence_citations && output.evidence_refs.is_empty() {
            return ControlVerdict::fail("Missing evidence citations");
        }

        let verdict = self.validate(&output.proposed_action);
        if !verdict.is_pass() {
            return verdict;
        }

        if self.reject_redundant_calls && memory.is_redundant(&output.proposed_action) {
            return ControlVerdict::fail("Redundant tool call: evidence already in memory");
        }
        ControlVerdict::Pass
    }
}
