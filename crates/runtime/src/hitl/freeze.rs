//! Freeze/thaw manager
//!
//! Captures the loop's full cognitive state at an action boundary, then
//! applies exactly one human decision to it. An approved or modified state
//! thaws into an action to execute; a rejected one yields a virtual
//! rejection cycle that routes around the blocked action.
//!
//! Each snapshot is hashed with SHA-256 when frozen. Resolving re-hashes the
//! live loop state and refuses to thaw if it drifted from the snapshot, so
//! the state a human decided on is the state that resumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::audit::{AuditEntry, AuditEventType, AuditLog};
use crate::hitl::policy::{InterventionLevel, PolicyVerdict};
use crate::reasoning::context::{ContextPatch, LoopContext, TaskContext, DEFAULT_RETRY_GUIDANCE};
use crate::reasoning::loop_types::{ActionRecord, CognitionOutput, ProposedAction};
use crate::reasoning::memory::{EvidenceSnapshot, Memory};
use crate::types::{FreezeId, HitlError};

const TASK_EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeStatus {
    Frozen,
    Thawed,
}

/// The three ways a human can resolve a frozen state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Modify,
    Reject,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::Modify => "modify",
            Self::Reject => "reject",
        })
    }
}

/// A human's answer to an intervention request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub freeze_id: FreezeId,
    pub decision: Decision,
    /// Present iff `decision` is `Modify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_action: Option<ProposedAction>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl HumanDecision {
    fn new(freeze_id: FreezeId, decision: Decision, rationale: impl Into<String>) -> Self {
        Self {
            freeze_id,
            decision,
            modified_action: None,
            rationale: rationale.into(),
            reviewer: None,
            decided_at: Utc::now(),
        }
    }

    pub fn approve(freeze_id: FreezeId, rationale: impl Into<String>) -> Self {
        Self::new(freeze_id, Decision::Approve, rationale)
    }

    pub fn reject(freeze_id: FreezeId, reason: impl Into<String>) -> Self {
        Self::new(freeze_id, Decision::Reject, reason)
    }

    pub fn modify(
        freeze_id: FreezeId,
        modified_action: ProposedAction,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            modified_action: Some(modified_action),
            ..Self::new(freeze_id, Decision::Modify, rationale)
        }
    }

    pub fn with_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewer = Some(reviewer.into());
        self
    }
}

/// Complete cognitive state captured at a HITL gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenState {
    pub freeze_id: FreezeId,
    pub frozen_at: DateTime<Utc>,
    pub loop_counter: u64,
    pub cognition_output: CognitionOutput,
    pub memory_snapshot: Vec<ActionRecord>,
    pub evidence_snapshot: EvidenceSnapshot,
    pub context: TaskContext,
    pub intervention_level: InterventionLevel,
    pub intervention_reason: String,
    pub status: FreezeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<HumanDecision>,
    /// Hex SHA-256 of the captured state.
    pub snapshot_digest: String,
}

#[derive(Serialize)]
struct SnapshotView<'a> {
    loop_counter: u64,
    cognition_output: &'a CognitionOutput,
    memory_snapshot: &'a [ActionRecord],
    evidence_snapshot: &'a EvidenceSnapshot,
    context: &'a TaskContext,
}

impl<'a> SnapshotView<'a> {
    fn live(loop_ctx: &'a LoopContext, memory: &'a Memory, output: &'a CognitionOutput) -> Self {
        Self {
            loop_counter: loop_ctx.loop_counter,
            cognition_output: output,
            memory_snapshot: memory.records(),
            evidence_snapshot: memory.evidence_cache(),
            context: &loop_ctx.context,
        }
    }
}

fn snapshot_digest(view: &SnapshotView<'_>) -> Result<String, HitlError> {
    let bytes = serde_json::to_vec(view).map_err(|e| HitlError::SnapshotFailed {
        message: e.to_string(),
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

impl FrozenState {
    pub fn is_frozen(&self) -> bool {
        self.status == FreezeStatus::Frozen
    }

    /// The decisions a renderer should offer for this intervention level.
    pub fn allowed_decisions(&self) -> &'static [Decision] {
        match self.intervention_level {
            InterventionLevel::Confirm => &[Decision::Approve, Decision::Reject],
            _ => &[Decision::Approve, Decision::Modify, Decision::Reject],
        }
    }

    pub fn pending_action(&self) -> &ProposedAction {
        &self.cognition_output.proposed_action
    }

    /// Human-readable intervention request.
    pub fn summary(&self) -> String {
        let task: String = self.context.task.chars().take(TASK_EXCERPT_CHARS).collect();
        let evidence = if self.cognition_output.evidence_refs.is_empty() {
            "none cited".to_string()
        } else {
            self.cognition_output.evidence_refs.join(", ")
        };
        let args = serde_json::to_string(&self.pending_action().arguments).unwrap_or_default();
        let options = self
            .allowed_decisions()
            .iter()
            .map(Decision::to_string)
            .collect::<Vec<_>>()
            .join(" / ");

        format!(
            "[{}] {}: {}\nTask: {}\nReasoning: {}\nConfidence: {:.2}\nEvidence: {}\nPending action: {} {}\nOptions: {}",
            self.freeze_id,
            self.intervention_level,
            self.intervention_reason,
            task,
            self.cognition_output.reasoning,
            self.cognition_output.confidence,
            evidence,
            self.pending_action().tool_name,
            args,
            options,
        )
    }

}

/// What the controller does after a thaw.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Execute this action (original or modified).
    Execute(ProposedAction),
    /// Skip the action and run a virtual rejection cycle.
    VirtualRejection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutcome {
    pub freeze_id: FreezeId,
    pub decision: Decision,
    pub next: NextStep,
}

/// A cycle that consumes a human rejection as context feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualRejectionCycle {
    pub freeze_id: FreezeId,
    pub rejection_reason: String,
    pub context_patch: ContextPatch,
}

/// Owns every frozen state of a task run.
#[derive(Debug, Default)]
pub struct FreezeThawManager {
    states: Vec<FrozenState>,
    outstanding: Option<FreezeId>,
}

impl FreezeThawManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the loop state and record `state_frozen`.
    pub fn freeze(
        &mut self,
        loop_ctx: &LoopContext,
        memory: &Memory,
        output: &CognitionOutput,
        verdict: &PolicyVerdict,
        audit: &mut AuditLog,
    ) -> Result<FrozenState, HitlError> {
        if let Some(outstanding) = self.outstanding {
            return Err(HitlError::AlreadyFrozen { outstanding });
        }

        let freeze_id = FreezeId(self.states.len() as u64 + 1);
        let mut state = FrozenState {
            freeze_id,
            frozen_at: Utc::now(),
            loop_counter: loop_ctx.loop_counter,
            cognition_output: output.clone(),
            memory_snapshot: memory.snapshot(),
            evidence_snapshot: memory.evidence_snapshot(),
            context: loop_ctx.context.clone(),
            intervention_level: verdict.level,
            intervention_reason: verdict.reason.clone(),
            status: FreezeStatus::Frozen,
            resolution: None,
            snapshot_digest: String::new(),
        };
        state.snapshot_digest = snapshot_digest(&SnapshotView::live(loop_ctx, memory, output))?;

        tracing::info!(
            freeze_id = %freeze_id,
            cycle = state.loop_counter,
            level = %verdict.level,
            tool = %output.proposed_action.tool_name,
            "State frozen"
        );
        audit.record(
            AuditEntry::system(AuditEventType::StateFrozen, state.loop_counter)
                .with_freeze(freeze_id)
                .with_payload(serde_json::json!({
                    "intervention_level": verdict.level,
                    "reason": verdict.reason,
                    "tool": output.proposed_action.tool_name,
                    "snapshot_digest": state.snapshot_digest,
                })),
        );

        self.outstanding = Some(freeze_id);
        self.states.push(state.clone());
        Ok(state)
    }

    /// Apply a human decision and thaw the state. `loop_ctx` and `memory`
    /// must still match the snapshot taken at freeze time.
    pub fn resolve(
        &mut self,
        decision: HumanDecision,
        loop_ctx: &LoopContext,
        memory: &Memory,
        audit: &mut AuditLog,
    ) -> Result<ResolvedOutcome, HitlError> {
        let freeze_id = decision.freeze_id;
        let state = self
            .states
            .iter_mut()
            .find(|s| s.freeze_id == freeze_id)
            .ok_or(HitlError::UnknownFreeze(freeze_id))?;
        if !state.is_frozen() {
            return Err(HitlError::AlreadyResolved(freeze_id));
        }

        let live = SnapshotView::live(loop_ctx, memory, &state.cognition_output);
        if snapshot_digest(&live)? != state.snapshot_digest {
            tracing::warn!(freeze_id = %freeze_id, "Loop state drifted while frozen");
            return Err(HitlError::SnapshotFailed {
                message: format!("loop state changed while {freeze_id} was frozen"),
            });
        }

        let next = match decision.decision {
            Decision::Approve => NextStep::Execute(state.cognition_output.proposed_action.clone()),
            Decision::Modify => NextStep::Execute(
                decision
                    .modified_action
                    .clone()
                    .ok_or(HitlError::MissingModifiedAction(freeze_id))?,
            ),
            Decision::Reject => NextStep::VirtualRejection,
        };

        let event_type = match decision.decision {
            Decision::Approve => AuditEventType::Approved,
            Decision::Modify => AuditEventType::Modified,
            Decision::Reject => AuditEventType::Rejected,
        };
        audit.record(
            AuditEntry::human(event_type, state.loop_counter)
                .with_freeze(freeze_id)
                .with_payload(serde_json::json!({
                    "rationale": decision.rationale,
                    "reviewer": decision.reviewer,
                    "modified_action": decision.modified_action,
                })),
        );
        audit.record(
            AuditEntry::system(AuditEventType::StateThawed, state.loop_counter)
                .with_freeze(freeze_id),
        );

        tracing::info!(
            freeze_id = %freeze_id,
            decision = %decision.decision,
            "State thawed"
        );

        let resolved = ResolvedOutcome {
            freeze_id,
            decision: decision.decision,
            next,
        };
        state.status = FreezeStatus::Thawed;
        state.resolution = Some(decision);
        self.outstanding = None;
        Ok(resolved)
    }

    /// Derive the virtual rejection cycle for a rejected state.
    pub fn create_virtual_rejection_cycle(
        &self,
        freeze_id: FreezeId,
        retry_guidance: Option<&str>,
    ) -> Result<VirtualRejectionCycle, HitlError> {
        let state = self.get(freeze_id).ok_or(HitlError::UnknownFreeze(freeze_id))?;
        let rationale = match &state.resolution {
            Some(d) if d.decision == Decision::Reject => d.rationale.trim(),
            _ => return Err(HitlError::NotRejected(freeze_id)),
        };
        let rejection_reason = if rationale.is_empty() {
            "Rejected by human reviewer".to_string()
        } else {
            rationale.to_string()
        };

        Ok(VirtualRejectionCycle {
            freeze_id,
            rejection_reason: rejection_reason.clone(),
            context_patch: ContextPatch::HumanRejection {
                rejection_reason,
                retry_guidance: retry_guidance.unwrap_or(DEFAULT_RETRY_GUIDANCE).to_string(),
                previous_proposal: state.cognition_output.proposed_action.clone(),
            },
        })
    }

    pub fn get(&self, freeze_id: FreezeId) -> Option<&FrozenState> {
        self.states.iter().find(|s| s.freeze_id == freeze_id)
    }

    /// The unresolved freeze, if any. At most one exists.
    pub fn outstanding(&self) -> Option<FreezeId> {
        self.outstanding
    }

    /// All frozen states, resolved or not, in freeze order.
    pub fn frozen_states(&self) -> &[FrozenState] {
        &self.states
    }

    pub fn into_states(self) -> Vec<FrozenState> {
        self.states
    }
}
