//! Structured tracing for cognitive cycles
//!
//! One event per phase transition, tagged with the task id and cycle
//! index, plus a start and a terminal summary for the run.

use std::time::{Duration, Instant};

use crate::hitl::freeze::Decision;
use crate::hitl::policy::InterventionLevel;
use crate::reasoning::loop_types::TerminationReason;
use crate::types::{FreezeId, TaskId};

/// Tracing context for a single task run.
#[derive(Debug)]
pub struct CycleTracer {
    task_id: TaskId,
    start: Instant,
    cycle: u64,
}

impl CycleTracer {
    pub fn start(task_id: TaskId, task: &str) -> Self {
        tracing::info!(task_id = %task_id, task_len = task.len(), "Task run started");
        Self {
            task_id,
            start: Instant::now(),
            cycle: 0,
        }
    }

    pub fn begin_cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
        tracing::debug!(task_id = %self.task_id, cycle, "Cycle started");
    }

    pub fn trace_retrieval(&self, evidence_keys: usize) {
        tracing::debug!(task_id = %self.task_id, evidence_keys, "Retrieval completed");
    }

    pub fn trace_cognition(&self, tool: &str, confidence: f64, is_final: bool, duration: Duration) {
        tracing::debug!(
            task_id = %self.task_id,
            cycle = self.cycle,
            tool,
            confidence,
            is_final,
            duration_ms = duration.as_millis() as u64,
            "Cognition phase completed"
        );
    }

    pub fn trace_control_rejection(&self, tool: &str, reason: &str) {
        tracing::warn!(
            task_id = %self.task_id,
            cycle = self.cycle,
            tool,
            reason,
            "Control rejected proposal"
        );
    }

    pub fn trace_gate(&self, tool: &str, level: InterventionLevel, reason: &str) {
        tracing::debug!(
            task_id = %self.task_id,
            cycle = self.cycle,
            tool,
            level = %level,
            reason,
            "Policy gate evaluated"
        );
    }

    pub fn trace_decision(&self, freeze_id: FreezeId, decision: Decision, waited: Duration) {
        tracing::info!(
            task_id = %self.task_id,
            cycle = self.cycle,
            freeze_id = %freeze_id,
            decision = %decision,
            waited_ms = waited.as_millis() as u64,
            "Human decision received"
        );
    }

    pub fn trace_action(&self, tool: &str, success: bool, duration: Duration) {
        if success {
            tracing::debug!(
                task_id = %self.task_id,
                cycle = self.cycle,
                tool,
                duration_ms = duration.as_millis() as u64,
                "Tool call succeeded"
            );
        } else {
            tracing::warn!(
                task_id = %self.task_id,
                cycle = self.cycle,
                tool,
                duration_ms = duration.as_millis() as u64,
                "Tool call failed"
            );
        }
    }

    pub fn trace_finished(&self, termination: &TerminationReason, total_loops: u64, action_count: u64) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        match termination {
            TerminationReason::Completed => tracing::info!(
                task_id = %self.task_id,
                total_loops,
                action_count,
                duration_ms,
                "Task run completed"
            ),
            other => tracing::warn!(
                task_id = %self.task_id,
                termination = ?other,
                total_loops,
                action_count,
                duration_ms,
                "Task run terminated"
            ),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn current_cycle(&self) -> u64 {
        self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracer_tracks_cycle() {
        let mut tracer = CycleTracer::start(TaskId::new(), "plan a trip");
        assert_eq!(tracer.current_cycle(), 0);
        tracer.begin_cycle(3);
        tracer.trace_cognition("get_weather", 0.9, false, Duration::from_millis(4));
        tracer.trace_gate("get_weather", InterventionLevel::None, "No intervention required");
        tracer.trace_action("get_weather", true, Duration::from_millis(1));
        assert_eq!(tracer.current_cycle(), 3);
        tracer.trace_finished(&TerminationReason::Completed, 4, 4);
    }
}
