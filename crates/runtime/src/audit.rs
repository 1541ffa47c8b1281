//! Glassbox audit log
//!
//! Append-only, task-scoped record of every system and human event in a
//! run. Trace ids (`HITL-%04d`) are assigned at append time, so ordering
//! and uniqueness follow from insertion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FreezeId, TraceId};

/// Kinds of events recorded in the glassbox trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RunStarted,
    RetrievalCompleted,
    ControlRejected,
    InterventionNotified,
    StateFrozen,
    ApprovalRequested,
    Approved,
    Modified,
    Rejected,
    StateThawed,
    VirtualRejection,
    ActionExecuted,
    ActionFailed,
    DecisionTimeout,
    Error,
    RunSummary,
}

/// Who caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Human,
}

/// An event to append. Trace id and timestamp are assigned by the log.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub event_type: AuditEventType,
    pub actor: Actor,
    pub loop_index: u64,
    pub freeze_id: Option<FreezeId>,
    pub payload: serde_json::Value,
}

impl AuditEntry {
    /// A system event for the given cycle.
    pub fn system(event_type: AuditEventType, loop_index: u64) -> Self {
        Self {
            event_type,
            actor: Actor::System,
            loop_index,
            freeze_id: None,
            payload: serde_json::Value::Null,
        }
    }

    /// A human event for the given cycle.
    pub fn human(event_type: AuditEventType, loop_index: u64) -> Self {
        Self {
            actor: Actor::Human,
            ..Self::system(event_type, loop_index)
        }
    }

    pub fn with_freeze(mut self, freeze_id: FreezeId) -> Self {
        self.freeze_id = Some(freeze_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A recorded event. Never mutated or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub trace_id: TraceId,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: Actor,
    pub loop_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze_id: Option<FreezeId>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

/// Counts derived from the event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_events: u64,
    /// Freezes: interventions that required a human decision.
    pub total_interventions: u64,
    pub notifications: u64,
    pub approvals: u64,
    pub modifications: u64,
    pub rejections: u64,
    pub control_rejections: u64,
    pub errors: u64,
}

/// Externally consumable form of the log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditExport {
    pub events: Vec<AuditEvent>,
    pub statistics: AuditStatistics,
}

/// Append-only audit log for one task run.
#[derive(Debug, Default)]
pub struct AuditLog {
    events: Vec<AuditEvent>,
    last_trace: u64,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its trace id.
    pub fn record(&mut self, entry: AuditEntry) -> TraceId {
        self.last_trace += 1;
        let trace_id = TraceId(self.last_trace);
        tracing::debug!(
            trace_id = %trace_id,
            event = ?entry.event_type,
            loop_index = entry.loop_index,
            "Audit event recorded"
        );
        self.events.push(AuditEvent {
            trace_id,
            timestamp: Utc::now(),
            event_type: entry.event_type,
            actor: entry.actor,
            loop_index: entry.loop_index,
            freeze_id: entry.freeze_id,
            payload: entry.payload,
        });
        trace_id
    }

    /// All events, oldest first.
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events of one kind, oldest first.
    pub fn events_of(&self, event_type: AuditEventType) -> impl Iterator<Item = &AuditEvent> {
        self.events
            .iter()
            .filter(move |e| e.event_type == event_type)
    }

    pub fn statistics(&self) -> AuditStatistics {
        let mut stats = AuditStatistics {
            total_events: self.events.len() as u64,
            ..AuditStatistics::default()
        };
        for event in &self.events {
            match event.event_type {
                AuditEventType::StateFrozen => stats.total_interventions += 1,
                AuditEventType::InterventionNotified => stats.notifications += 1,
                AuditEventType::Approved => stats.approvals += 1,
                AuditEventType::Modified => stats.modifications += 1,
                AuditEventType::Rejected => stats.rejections += 1,
                AuditEventType::ControlRejected => stats.control_rejections += 1,
                AuditEventType::Error => stats.errors += 1,
                _ => {}
            }
        }
        stats
    }

    /// Ordered copy of all events plus statistics.
    pub fn export(&self) -> AuditExport {
        AuditExport {
            events: self.events.clone(),
            statistics: self.statistics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_ids_are_sequential() {
        let mut log = AuditLog::new();
        let first = log.record(AuditEntry::system(AuditEventType::RunStarted, 0));
        let second = log.record(AuditEntry::system(AuditEventType::StateFrozen, 0));
        let third = log.record(AuditEntry::human(AuditEventType::Approved, 0));

        assert_eq!(first.to_string(), "HITL-0001");
        assert!(first < second && second < third);
        assert_eq!(log.len(), 3);
        assert_eq!(log.events()[2].actor, Actor::Human);
    }

    #[test]
    fn test_statistics_count_by_type() {
        let mut log = AuditLog::new();
        log.record(AuditEntry::system(AuditEventType::StateFrozen, 1).with_freeze(FreezeId(1)));
        log.record(AuditEntry::human(AuditEventType::Approved, 1).with_freeze(FreezeId(1)));
        log.record(AuditEntry::system(AuditEventType::StateFrozen, 2).with_freeze(FreezeId(2)));
        log.record(AuditEntry::human(AuditEventType::Rejected, 2).with_freeze(FreezeId(2)));
        log.record(AuditEntry::system(AuditEventType::InterventionNotified, 3));
        log.record(AuditEntry::system(AuditEventType::ControlRejected, 4));

        let stats = log.statistics();
        assert_eq!(stats.total_events, 6);
        assert_eq!(stats.total_interventions, 2);
        assert_eq!(stats.approvals, 1);
        assert_eq!(stats.rejections, 1);
        assert_eq!(stats.modifications, 0);
        assert_eq!(stats.notifications, 1);
        assert_eq!(stats.control_rejections, 1);
    }

    #[test]
    fn test_export_preserves_order_and_skips_empty_fields() {
        let mut log = AuditLog::new();
        log.record(AuditEntry::system(AuditEventType::RunStarted, 0));
        log.record(
            AuditEntry::system(AuditEventType::ActionExecuted, 0)
                .with_payload(serde_json::json!({"tool": "get_weather"})),
        );

        let export = log.export();
        assert_eq!(export.events.len(), 2);
        assert_eq!(export.events[0].event_type, AuditEventType::RunStarted);

        let json = serde_json::to_value(&export).unwrap();
        let first = &json["events"][0];
        assert_eq!(first["trace_id"], "HITL-0001");
        assert_eq!(first["event_type"], "run_started");
        assert!(first.get("payload").is_none());
        assert!(first.get("freeze_id").is_none());
        assert_eq!(json["events"][1]["payload"]["tool"], "get_weather");
    }
}
