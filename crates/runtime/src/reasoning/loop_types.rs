//! Core types for the structured cognitive loop
//!
//! Defines proposed actions, cognition output, memory records, loop
//! configuration, and the final run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::audit::{AuditExport, AuditStatistics};
use crate::hitl::freeze::FrozenState;
use crate::types::{FreezeId, SclError, TaskId};

/// Tool arguments. Ordered so that evidence ids are canonical.
pub type ToolArguments = BTreeMap<String, serde_json::Value>;

/// An action proposed by the cognition engine: a tool name and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ProposedAction {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: ToolArguments::new(),
        }
    }

    /// Add an argument (builder style).
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Canonical evidence id for the result of this action.
    pub fn evidence_id(&self) -> String {
        let args = serde_json::to_string(&self.arguments).unwrap_or_default();
        format!("evidence_{}_{}", self.tool_name, args)
    }
}

/// Output of one cognition step. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CognitionOutput {
    /// Free-text reasoning trace.
    pub reasoning: String,
    /// The action the engine wants to take.
    pub proposed_action: ProposedAction,
    /// Self-reported confidence in [0, 1].
    pub confidence: f64,
    /// Evidence ids cited by the reasoning.
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    /// Whether executing this action completes the task.
    #[serde(default)]
    pub is_final: bool,
}

impl CognitionOutput {
    pub fn new(reasoning: impl Into<String>, proposed_action: ProposedAction) -> Self {
        Self {
            reasoning: reasoning.into(),
            proposed_action,
            confidence: 1.0,
            evidence_refs: Vec::new(),
            is_final: false,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_evidence(mut self, refs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.evidence_refs = refs.into_iter().map(Into::into).collect();
        self
    }

    pub fn final_action(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// How a cycle ended, as recorded in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The tool ran and returned a result.
    Executed { result: serde_json::Value },
    /// The tool ran and failed.
    Failed { reason: String },
    /// A human rejected the action; it never ran.
    HumanRejected { reason: String },
    /// The control validator rejected the action; it never ran.
    ControlRejected { reason: String },
}

impl ActionOutcome {
    /// The tool result, if the action executed successfully.
    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Executed { result } => Some(result),
            _ => None,
        }
    }

    /// Whether the tool was actually invoked.
    pub fn was_executed(&self) -> bool {
        matches!(self, Self::Executed { .. } | Self::Failed { .. })
    }
}

/// One memory record per completed cycle. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Zero-based index of the cycle that produced this record.
    pub loop_index: u64,
    pub tool_name: String,
    pub arguments: ToolArguments,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
    /// Freeze that gated this action, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze_id: Option<FreezeId>,
    pub recorded_at: DateTime<Utc>,
}

/// Configuration for the loop itself (`[loop]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum completed cycles before the run ends with `LoopLimitExceeded`.
    pub max_loops: u64,
    /// Per-call timeout for tool execution.
    #[serde(with = "humantime_serde")]
    pub tool_timeout: Duration,
    /// How long to wait for a human decision. `None` waits indefinitely.
    #[serde(default, with = "humantime_serde")]
    pub decision_timeout: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_loops: 20,
            tool_timeout: Duration::from_secs(30),
            decision_timeout: None,
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminationReason {
    /// A final action executed successfully.
    Completed,
    /// The configured cycle ceiling was reached.
    LoopLimitExceeded { limit: u64 },
    /// Cancelled externally.
    Aborted { reason: String },
    /// A fatal error ended the run.
    Failed { error: String },
}

/// Terminal summary, recorded in the audit log and the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_loops: u64,
    /// Cycles in which a tool was actually invoked.
    pub action_count: u64,
    pub statistics: AuditStatistics,
}

/// The glassbox report for a task run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub task_id: TaskId,
    pub task: String,
    pub termination: TerminationReason,
    pub summary: RunSummary,
    pub memory: Vec<ActionRecord>,
    pub frozen_states: Vec<FrozenState>,
    pub audit: AuditExport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Map non-completed terminations onto an error.
    pub fn ensure_completed(&self) -> Result<&Self, SclError> {
        match &self.termination {
            TerminationReason::Completed => Ok(self),
            TerminationReason::LoopLimitExceeded { limit } => {
                Err(SclError::LoopLimitExceeded { limit: *limit })
            }
            TerminationReason::Aborted { .. } => Err(SclError::Cancelled),
            TerminationReason::Failed { error } => Err(SclError::RunFailed {
                message: error.clone(),
            }),
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        use std::io::Write;

        let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(std::io::Error::other)?;
        writer.flush()
    }
}

/// A fatal run error, carrying the report so the trace is never lost.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: SclError,
    pub report: Box<RunReport>,
}
