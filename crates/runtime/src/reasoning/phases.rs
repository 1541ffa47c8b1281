//! Typestate-enforced cycle phases
//!
//! One cognitive cycle moves through Cognition → Control → Gate → Action
//! → Record. Each transition consumes `self`, so a proposal cannot reach
//! the executor without passing control validation and the HITL gate, and
//! every path (including control and human rejections) ends in Record,
//! which appends exactly one memory record and advances the loop counter.

use std::marker::PhantomData;
use std::time::{Duration, Instant};

use crate::audit::{AuditEntry, AuditEventType, AuditLog};
use crate::hitl::decision::HumanDecisionProvider;
use crate::hitl::freeze::{FreezeThawManager, NextStep};
use crate::hitl::notifier::{InterventionNotice, Notifier};
use crate::hitl::policy::{InterventionLevel, PolicyEngine, PolicyInput};
use crate::reasoning::cognition::CognitionEngine;
use crate::reasoning::context::{ContextPatch, LoopContext, TaskContext};
use crate::reasoning::control::{ControlValidator, ControlVerdict};
use crate::reasoning::executor::ToolExecutor;
use crate::reasoning::loop_types::{ActionOutcome, ActionRecord, CognitionOutput, ProposedAction};
use crate::reasoning::memory::Memory;
use crate::reasoning::tracing_spans::CycleTracer;
use crate::types::{DecisionError, ExecutionFailure, FreezeId, SclError, TaskId};

/// Everything owned by one task run.
#[derive(Debug)]
pub struct RunState {
    pub task_id: TaskId,
    pub loop_ctx: LoopContext,
    pub memory: Memory,
    pub audit: AuditLog,
    pub freezes: FreezeThawManager,
    pub tracer: CycleTracer,
}

impl RunState {
    pub fn new(task: &str) -> Self {
        let task_id = TaskId::new();
        Self {
            task_id,
            loop_ctx: LoopContext::new(TaskContext::new(task, serde_json::Value::Null)),
            memory: Memory::new(),
            audit: AuditLog::new(),
            freezes: FreezeThawManager::new(),
            tracer: CycleTracer::start(task_id, task),
        }
    }

    fn cycle_index(&self) -> u64 {
        self.loop_ctx.loop_counter
    }
}

// ── Phase markers ───────────────────────────────────────────────────

/// Waiting for the cognition engine.
pub struct Cognition;
/// Checking the proposal against static rules.
pub struct Control;
/// Consulting the policy engine and, if needed, a human.
pub struct Gate;
/// Executing the approved action.
pub struct Action;
/// Appending the memory record.
pub struct Record;

pub trait CyclePhase {}
impl CyclePhase for Cognition {}
impl CyclePhase for Control {}
impl CyclePhase for Gate {}
impl CyclePhase for Action {}
impl CyclePhase for Record {}

/// Data carried between phases.
enum PhaseData {
    Empty,
    Proposal(CognitionOutput),
    Approved {
        output: CognitionOutput,
        action: ProposedAction,
        freeze_id: Option<FreezeId>,
    },
    Finished {
        action: ProposedAction,
        outcome: ActionOutcome,
        freeze_id: Option<FreezeId>,
        completes: bool,
    },
}

/// One cycle in a specific phase.
pub struct Cycle<'a, P: CyclePhase> {
    run: &'a mut RunState,
    data: PhaseData,
    _phase: PhantomData<P>,
}

impl<'a, P: CyclePhase> Cycle<'a, P> {
    fn into_phase<N: CyclePhase>(self, data: PhaseData) -> Cycle<'a, N> {
        Cycle {
            run: self.run,
            data,
            _phase: PhantomData,
        }
    }

    fn proposal(&self) -> Result<&CognitionOutput, SclError> {
        match &self.data {
            PhaseData::Proposal(output) | PhaseData::Approved { output, .. } => Ok(output),
            _ => Err(SclError::RunFailed {
                message: "cycle phase has no cognition output".into(),
            }),
        }
    }

    /// Short-circuit to Record without executing anything.
    fn skip_to_record(
        self,
        action: ProposedAction,
        outcome: ActionOutcome,
        freeze_id: Option<FreezeId>,
    ) -> Cycle<'a, Record> {
        self.into_phase(PhaseData::Finished {
            action,
            outcome,
            freeze_id,
            completes: false,
        })
    }
}

/// Result of the control phase.
pub enum Validated<'a> {
    Passed(Cycle<'a, Gate>),
    Rejected(Cycle<'a, Record>),
}

/// Result of the gate phase.
pub enum Gated<'a> {
    Proceed(Cycle<'a, Action>),
    VirtualRejection(Cycle<'a, Record>),
}

impl<'a> Cycle<'a, Cognition> {
    pub fn begin(run: &'a mut RunState) -> Self {
        let index = run.cycle_index();
        run.tracer.begin_cycle(index);
        Self {
            run,
            data: PhaseData::Empty,
            _phase: PhantomData,
        }
    }

    /// Ask the engine for a proposal. Human feedback is consumed here.
    pub async fn cognize(
        self,
        engine: &dyn CognitionEngine,
    ) -> Result<Cycle<'a, Control>, SclError> {
        let started = Instant::now();
        let output = engine
            .invoke(&self.run.loop_ctx.context, self.run.memory.records())
            .await
            .map_err(|e| SclError::CognitionUnavailable {
                message: e.to_string(),
            })?;
        self.run.loop_ctx.context.clear_human_feedback();

        self.run.tracer.trace_cognition(
            &output.proposed_action.tool_name,
            output.confidence,
            output.is_final,
            started.elapsed(),
        );
        Ok(self.into_phase(PhaseData::Proposal(output)))
    }
}

impl<'a> Cycle<'a, Control> {
    /// Static validation. A failure never reaches the gate.
    pub fn validate(self, validator: &ControlValidator) -> Result<Validated<'a>, SclError> {
        let output = self.proposal()?.clone();
        match validator.validate_output(&output, &self.run.memory) {
            ControlVerdict::Pass => Ok(Validated::Passed(self.into_phase(PhaseData::Proposal(output)))),
            ControlVerdict::Fail { reason } => {
                let index = self.run.cycle_index();
                let tool = output.proposed_action.tool_name.clone();
                self.run.tracer.trace_control_rejection(&tool, &reason);
                self.run.audit.record(
                    AuditEntry::system(AuditEventType::ControlRejected, index).with_payload(
                        serde_json::json!({"tool": tool, "reason": reason}),
                    ),
                );
                self.run
                    .loop_ctx
                    .context
                    .apply(ContextPatch::ControlRejection {
                        reason: reason.clone(),
                    });
                Ok(Validated::Rejected(self.skip_to_record(
                    output.proposed_action,
                    ActionOutcome::ControlRejected { reason },
                    None,
                )))
            }
        }
    }
}

impl<'a> Cycle<'a, Gate> {
    /// Evaluate policy and, for freezing levels, block on a human decision.
    pub async fn gate(
        mut self,
        policy: &PolicyEngine,
        notifier: &dyn Notifier,
        decisions: &dyn HumanDecisionProvider,
        decision_timeout: Option<Duration>,
    ) -> Result<Gated<'a>, SclError> {
        let output = self.proposal()?.clone();
        let index = self.run.cycle_index();
        let verdict = policy.evaluate(&PolicyInput::from_output(&output, index));
        self.run
            .tracer
            .trace_gate(&output.proposed_action.tool_name, verdict.level, &verdict.reason);

        if verdict.level == InterventionLevel::Notify {
            self.run.audit.record(
                AuditEntry::system(AuditEventType::InterventionNotified, index).with_payload(
                    serde_json::json!({
                        "tool": output.proposed_action.tool_name,
                        "reason": verdict.reason,
                    }),
                ),
            );
            notifier
                .notify(&InterventionNotice {
                    loop_index: index,
                    action: output.proposed_action.clone(),
                    reason: verdict.reason.clone(),
                    reasoning: output.reasoning.clone(),
                })
                .await;
        }

        if !verdict.level.requires_freeze() {
            let action = output.proposed_action.clone();
            return Ok(Gated::Proceed(self.into_phase(PhaseData::Approved {
                output,
                action,
                freeze_id: None,
            })));
        }

        let state = {
            let run = &mut *self.run;
            run.freezes
                .freeze(&run.loop_ctx, &run.memory, &output, &verdict, &mut run.audit)?
        };
        let freeze_id = state.freeze_id;
        self.run.audit.record(
            AuditEntry::system(AuditEventType::ApprovalRequested, index)
                .with_freeze(freeze_id)
                .with_payload(serde_json::json!({
                    "provider": decisions.provider_type(),
                    "allowed_decisions": state.allowed_decisions(),
                })),
        );

        let waited = Instant::now();
        let requested = match decision_timeout {
            Some(timeout) => tokio::time::timeout(timeout, decisions.request_decision(&state))
                .await
                .unwrap_or(Err(DecisionError::Timeout { timeout })),
            None => decisions.request_decision(&state).await,
        };
        let decision = match requested {
            Ok(d) if d.freeze_id == freeze_id => d,
            Ok(d) => {
                return Err(self.decision_unavailable(
                    freeze_id,
                    DecisionError::InvalidInput(format!(
                        "decision for {} received while {} is pending",
                        d.freeze_id, freeze_id
                    )),
                ))
            }
            Err(e) => return Err(self.decision_unavailable(freeze_id, e)),
        };
        self.run
            .tracer
            .trace_decision(freeze_id, decision.decision, waited.elapsed());

        let resolved = {
            let run = &mut *self.run;
            run.freezes
                .resolve(decision, &run.loop_ctx, &run.memory, &mut run.audit)?
        };
        match resolved.next {
            NextStep::Execute(action) => Ok(Gated::Proceed(self.into_phase(PhaseData::Approved {
                output,
                action,
                freeze_id: Some(freeze_id),
            }))),
            NextStep::VirtualRejection => {
                let cycle = self.run.freezes.create_virtual_rejection_cycle(freeze_id, None)?;
                self.run.audit.record(
                    AuditEntry::system(AuditEventType::VirtualRejection, index)
                        .with_freeze(freeze_id)
                        .with_payload(serde_json::json!({
                            "rejection_reason": cycle.rejection_reason,
                            "context_patch": cycle.context_patch,
                        })),
                );
                self.run.loop_ctx.context.apply(cycle.context_patch);
                Ok(Gated::VirtualRejection(self.skip_to_record(
                    output.proposed_action,
                    ActionOutcome::HumanRejected {
                        reason: cycle.rejection_reason,
                    },
                    Some(freeze_id),
                )))
            }
        }
    }

    fn decision_unavailable(&mut self, freeze_id: FreezeId, error: DecisionError) -> SclError {
        // Other failures are logged once the controller tears the run down.
        if let DecisionError::Timeout { .. } = error {
            let index = self.run.cycle_index();
            self.run.audit.record(
                AuditEntry::system(AuditEventType::DecisionTimeout, index)
                    .with_freeze(freeze_id)
                    .with_payload(serde_json::json!({"error": error.to_string()})),
            );
        }
        SclError::HumanDecisionUnavailable {
            freeze_id,
            source: error,
        }
    }
}

impl<'a> Cycle<'a, Action> {
    /// Run the approved action. Tool failures become context, never errors.
    pub async fn act(
        self,
        executor: &dyn ToolExecutor,
        tool_timeout: Duration,
    ) -> Result<Cycle<'a, Record>, SclError> {
        let (output, action, freeze_id) = match &self.data {
            PhaseData::Approved {
                output,
                action,
                freeze_id,
            } => (output.clone(), action.clone(), *freeze_id),
            _ => {
                return Err(SclError::RunFailed {
                    message: "action phase has no approved action".into(),
                })
            }
        };
        let index = self.run.cycle_index();
        let started = Instant::now();

        let executed = match tokio::time::timeout(
            tool_timeout,
            executor.execute(&action.tool_name, &action.arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExecutionFailure::Timeout {
                tool: action.tool_name.clone(),
                timeout: tool_timeout,
            }),
        };
        self.run
            .tracer
            .trace_action(&action.tool_name, executed.is_ok(), started.elapsed());

        let entry_for = |event_type| {
            let mut entry = AuditEntry::system(event_type, index);
            if let Some(id) = freeze_id {
                entry = entry.with_freeze(id);
            }
            entry
        };
        let (outcome, completes) = match executed {
            Ok(result) => {
                self.run
                    .memory
                    .store_evidence(action.evidence_id(), result.clone());
                self.run.audit.record(entry_for(AuditEventType::ActionExecuted).with_payload(
                    serde_json::json!({
                        "tool": action.tool_name,
                        "arguments": action.arguments,
                        "result": result,
                    }),
                ));
                self.run.loop_ctx.context.apply(ContextPatch::ActionResult {
                    result: result.clone(),
                });
                (ActionOutcome::Executed { result }, output.is_final)
            }
            Err(failure) => {
                let reason = failure.to_string();
                self.run.audit.record(entry_for(AuditEventType::ActionFailed).with_payload(
                    serde_json::json!({
                        "tool": action.tool_name,
                        "arguments": action.arguments,
                        "reason": reason,
                    }),
                ));
                self.run.loop_ctx.context.apply(ContextPatch::ActionFailure {
                    reason: reason.clone(),
                });
                (ActionOutcome::Failed { reason }, false)
            }
        };

        Ok(self.into_phase(PhaseData::Finished {
            action,
            outcome,
            freeze_id,
            completes,
        }))
    }
}

impl<'a> Cycle<'a, Record> {
    /// Append the memory record and advance the counter. Returns whether
    /// the task is now complete.
    pub fn record(self) -> Result<bool, SclError> {
        let PhaseData::Finished {
            action,
            outcome,
            freeze_id,
            completes,
        } = self.data
        else {
            return Err(SclError::RunFailed {
                message: "record phase has no outcome".into(),
            });
        };

        let run = self.run;
        run.memory.record_action(ActionRecord {
            loop_index: run.loop_ctx.loop_counter,
            tool_name: action.tool_name,
            arguments: action.arguments,
            outcome,
            freeze_id,
            recorded_at: chrono::Utc::now(),
        });
        run.loop_ctx.loop_counter += 1;
        if completes {
            run.loop_ctx.done = true;
        }
        Ok(completes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::decision::{AutoApprove, ScriptedDecision, ScriptedDecisionProvider};
    use crate::hitl::notifier::LogNotifier;
    use crate::hitl::policy::PolicyConfig;
    use crate::reasoning::cognition::ScriptedCognition;
    use crate::reasoning::control::ToolSpec;
    use crate::reasoning::executor::{ToolDescriptor, ToolRegistry};

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDescriptor::new("get_weather", "Weather").with_required(&["city"]),
            |_| Ok(serde_json::json!({"temperature": 72})),
        );
        registry.register(ToolDescriptor::new("send_email", "Email"), |_| {
            Ok(serde_json::json!("sent"))
        });
        registry
    }

    fn validator() -> ControlValidator {
        ControlValidator::new(vec![
            ToolSpec::new("get_weather", "Weather").with_required(&["city"]),
            ToolSpec::new("send_email", "Email"),
        ])
    }

    #[tokio::test]
    async fn test_full_cycle_executes_and_records() {
        let mut run = RunState::new("weather");
        let engine = ScriptedCognition::new(vec![CognitionOutput::new(
            "check",
            ProposedAction::new("get_weather").with_arg("city", "SF"),
        )
        .final_action()]);
        let policy = PolicyEngine::new(PolicyConfig::permissive());

        let control = Cycle::begin(&mut run).cognize(&engine).await.unwrap();
        let Validated::Passed(gate) = control.validate(&validator()).unwrap() else {
            panic!("expected control pass");
        };
        let Gated::Proceed(action) = gate
            .gate(&policy, &LogNotifier, &AutoApprove, None)
            .await
            .unwrap()
        else {
            panic!("expected proceed");
        };
        let done = action
            .act(&registry(), Duration::from_secs(1))
            .await
            .unwrap()
            .record()
            .unwrap();

        assert!(done);
        assert_eq!(run.loop_ctx.loop_counter, 1);
        assert_eq!(run.memory.len(), 1);
        assert!(run.loop_ctx.done);
    }

    #[tokio::test]
    async fn test_control_rejection_skips_gate_but_records() {
        let mut run = RunState::new("weather");
        let engine = ScriptedCognition::new(vec![CognitionOutput::new(
            "no city",
            ProposedAction::new("get_weather"),
        )]);

        let control = Cycle::begin(&mut run).cognize(&engine).await.unwrap();
        let Validated::Rejected(record) = control.validate(&validator()).unwrap() else {
            panic!("expected control rejection");
        };
        assert!(!record.record().unwrap());

        assert_eq!(run.loop_ctx.loop_counter, 1);
        assert!(run.loop_ctx.context.last_control_rejection.is_some());
        assert!(run.freezes.frozen_states().is_empty());
        assert!(matches!(
            run.memory.records()[0].outcome,
            ActionOutcome::ControlRejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_rejected_gate_routes_to_virtual_rejection() {
        let mut run = RunState::new("email");
        let engine = ScriptedCognition::new(vec![CognitionOutput::new(
            "send it",
            ProposedAction::new("send_email"),
        )]);
        let policy = PolicyEngine::new(PolicyConfig::permissive().with_high_risk(&["send_email"]));
        let decisions =
            ScriptedDecisionProvider::new(vec![ScriptedDecision::Reject("wrong address".into())]);

        let control = Cycle::begin(&mut run).cognize(&engine).await.unwrap();
        let Validated::Passed(gate) = control.validate(&validator()).unwrap() else {
            panic!("expected control pass");
        };
        let Gated::VirtualRejection(record) = gate
            .gate(&policy, &LogNotifier, &decisions, None)
            .await
            .unwrap()
        else {
            panic!("expected virtual rejection");
        };
        record.record().unwrap();

        assert!(run.loop_ctx.context.human_rejected());
        assert_eq!(run.memory.records()[0].freeze_id, Some(FreezeId(1)));
        assert!(run.memory.records()[0].outcome.result().is_none());
        assert_eq!(run.freezes.outstanding(), None);
    }

    #[tokio::test]
    async fn test_notify_proceeds_without_freezing() {
        use crate::hitl::notifier::ChannelNotifier;

        let mut run = RunState::new("weather");
        let engine = ScriptedCognition::new(vec![CognitionOutput::new(
            "again",
            ProposedAction::new("get_weather").with_arg("city", "Miami"),
        )]);
        let policy = PolicyEngine::new(PolicyConfig {
            confirm_after_n_loops: 0,
            ..PolicyConfig::permissive()
        });
        let (notifier, mut notices) = ChannelNotifier::new();

        let control = Cycle::begin(&mut run).cognize(&engine).await.unwrap();
        let Validated::Passed(gate) = control.validate(&validator()).unwrap() else {
            panic!("expected control pass");
        };
        let Gated::Proceed(action) = gate
            .gate(&policy, &notifier, &AutoApprove, None)
            .await
            .unwrap()
        else {
            panic!("expected proceed");
        };
        action
            .act(&registry(), Duration::from_secs(1))
            .await
            .unwrap()
            .record()
            .unwrap();

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.action.tool_name, "get_weather");
        assert!(run.freezes.frozen_states().is_empty());
        assert_eq!(
            run.audit
                .events_of(AuditEventType::InterventionNotified)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cognition_failure_is_fatal() {
        let mut run = RunState::new("x");
        let engine = ScriptedCognition::new(Vec::new());
        let err = Cycle::begin(&mut run).cognize(&engine).await.err().unwrap();
        assert!(matches!(err, SclError::CognitionUnavailable { .. }));
        assert_eq!(run.loop_ctx.loop_counter, 0);
    }
}
