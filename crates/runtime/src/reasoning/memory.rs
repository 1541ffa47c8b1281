//! Append-only working memory for a task run
//!
//! Holds one `ActionRecord` per completed cycle plus an evidence cache
//! keyed by canonical evidence id. Snapshots are deep copies, so frozen
//! states never observe later appends.

use std::collections::BTreeMap;

use crate::reasoning::loop_types::{ActionRecord, ProposedAction};

/// Evidence id under which the retrieval blob is cached.
pub const RETRIEVAL_EVIDENCE_ID: &str = "retrieval";

/// Evidence cache snapshot.
pub type EvidenceSnapshot = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default)]
pub struct Memory {
    records: Vec<ActionRecord>,
    evidence: EvidenceSnapshot,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for a completed cycle.
    pub fn record_action(&mut self, record: ActionRecord) {
        debug_assert!(
            self.records
                .last()
                .map_or(true, |last| last.loop_index < record.loop_index),
            "memory records must be appended in loop order"
        );
        self.records.push(record);
    }

    /// Deep copy of all records, oldest first.
    pub fn snapshot(&self) -> Vec<ActionRecord> {
        self.records.clone()
    }

    /// Borrowed view of all records, oldest first.
    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of cycles in which a tool was invoked.
    pub fn action_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.was_executed())
            .count()
    }

    pub fn store_evidence(&mut self, evidence_id: impl Into<String>, data: serde_json::Value) {
        self.evidence.insert(evidence_id.into(), data);
    }

    pub fn evidence(&self, evidence_id: &str) -> Option<&serde_json::Value> {
        self.evidence.get(evidence_id)
    }

    pub fn has_evidence(&self, evidence_id: &str) -> bool {
        self.evidence.contains_key(evidence_id)
    }

    /// Whether the result of this action is already cached.
    pub fn is_redundant(&self, action: &ProposedAction) -> bool {
        self.has_evidence(&action.evidence_id())
    }

    pub fn evidence_cache(&self) -> &EvidenceSnapshot {
        &self.evidence
    }

    /// Deep copy of the evidence cache.
    pub fn evidence_snapshot(&self) -> EvidenceSnapshot {
        self.evidence.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::loop_types::{ActionOutcome, ToolArguments};

    fn record(loop_index: u64, outcome: ActionOutcome) -> ActionRecord {
        ActionRecord {
            loop_index,
            tool_name: "get_weather".into(),
            arguments: ToolArguments::new(),
            outcome,
            freeze_id: None,
            recorded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_appends() {
        let mut memory = Memory::new();
        memory.record_action(record(
            0,
            ActionOutcome::Executed {
                result: serde_json::json!(72),
            },
        ));
        let snapshot = memory.snapshot();

        memory.record_action(record(
            1,
            ActionOutcome::Failed {
                reason: "timeout".into(),
            },
        ));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn test_action_count_skips_rejections() {
        let mut memory = Memory::new();
        memory.record_action(record(
            0,
            ActionOutcome::Executed {
                result: serde_json::json!(1),
            },
        ));
        memory.record_action(record(
            1,
            ActionOutcome::HumanRejected {
                reason: "no".into(),
            },
        ));
        memory.record_action(record(
            2,
            ActionOutcome::ControlRejected {
                reason: "bad args".into(),
            },
        ));
        memory.record_action(record(
            3,
            ActionOutcome::Failed {
                reason: "boom".into(),
            },
        ));
        assert_eq!(memory.action_count(), 2);
        assert_eq!(memory.len(), 4);
    }

    #[test]
    fn test_redundancy_uses_canonical_evidence_id() {
        let mut memory = Memory::new();
        let action = ProposedAction::new("get_weather").with_arg("city", "Miami");
        assert!(!memory.is_redundant(&action));

        memory.store_evidence(action.evidence_id(), serde_json::json!({"temp": 78}));
        assert!(memory.is_redundant(&action));
        assert!(!memory.is_redundant(&ProposedAction::new("get_weather").with_arg("city", "SF")));

        let snapshot = memory.evidence_snapshot();
        memory.store_evidence(RETRIEVAL_EVIDENCE_ID, serde_json::json!({}));
        assert_eq!(snapshot.len(), 1);
    }
}
