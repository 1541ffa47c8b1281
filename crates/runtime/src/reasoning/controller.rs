//! Structured cognitive loop controller
//!
//! Drives one task run: retrieval once, then cycles of
//! cognition → control → HITL gate → action or virtual rejection → record,
//! until a final action executes, the loop limit is reached, the run is
//! cancelled, or a fatal error occurs. Every ending emits a terminal
//! `run_summary` audit event and yields a full `RunReport`.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEntry, AuditEventType};
use crate::hitl::decision::HumanDecisionProvider;
use crate::hitl::notifier::{LogNotifier, Notifier};
use crate::hitl::policy::{PolicyConfig, PolicyEngine};
use crate::reasoning::cognition::CognitionEngine;
use crate::reasoning::control::ControlValidator;
use crate::reasoning::executor::ToolExecutor;
use crate::reasoning::loop_types::{LoopConfig, RunFailure, RunReport, RunSummary, TerminationReason};
use crate::reasoning::memory::RETRIEVAL_EVIDENCE_ID;
use crate::reasoning::phases::{Cognition, Cycle, Gated, RunState, Validated};
use crate::reasoning::retrieval::{Retriever, StaticRetriever};
use crate::types::SclError;

/// Wires the collaborators for task runs. Holds no per-task state, so one
/// controller can serve many runs.
pub struct SclController {
    cognition: Arc<dyn CognitionEngine>,
    executor: Arc<dyn ToolExecutor>,
    retriever: Arc<dyn Retriever>,
    decisions: Arc<dyn HumanDecisionProvider>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<PolicyEngine>,
    validator: Arc<ControlValidator>,
    config: LoopConfig,
}

/// Builder for `SclController`.
pub struct SclControllerBuilder {
    cognition: Arc<dyn CognitionEngine>,
    executor: Arc<dyn ToolExecutor>,
    decisions: Arc<dyn HumanDecisionProvider>,
    retriever: Option<Arc<dyn Retriever>>,
    notifier: Option<Arc<dyn Notifier>>,
    policy: Option<Arc<PolicyEngine>>,
    validator: Option<Arc<ControlValidator>>,
    config: LoopConfig,
}

impl SclControllerBuilder {
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn policy(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Defaults to a validator built from the executor's descriptors.
    pub fn validator(mut self, validator: Arc<ControlValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SclController {
        let validator = self.validator.unwrap_or_else(|| {
            Arc::new(ControlValidator::new(
                self.executor.descriptors().iter().map(|d| d.to_spec()),
            ))
        });
        SclController {
            cognition: self.cognition,
            executor: self.executor,
            retriever: self
                .retriever
                .unwrap_or_else(|| Arc::new(StaticRetriever::empty())),
            decisions: self.decisions,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            policy: self
                .policy
                .unwrap_or_else(|| Arc::new(PolicyEngine::new(PolicyConfig::default()))),
            validator,
            config: self.config,
        }
    }
}

impl SclController {
    pub fn builder(
        cognition: Arc<dyn CognitionEngine>,
        executor: Arc<dyn ToolExecutor>,
        decisions: Arc<dyn HumanDecisionProvider>,
    ) -> SclControllerBuilder {
        SclControllerBuilder {
            cognition,
            executor,
            decisions,
            retriever: None,
            notifier: None,
            policy: None,
            validator: None,
            config: LoopConfig::default(),
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Run a task to termination.
    pub async fn run(&self, task: &str) -> Result<RunReport, RunFailure> {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    /// Run a task, ending with `Aborted` as soon as `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        task: &str,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunFailure> {
        let started_at = chrono::Utc::now();
        let mut run = RunState::new(task);
        run.audit.record(
            AuditEntry::system(AuditEventType::RunStarted, 0).with_payload(serde_json::json!({
                "task_id": run.task_id,
                "task": task,
                "max_loops": self.config.max_loops,
            })),
        );

        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = self.retriever.retrieve(task) => Some(r),
        };
        match retrieved {
            None => return Ok(self.finish(run, task, started_at, aborted())),
            Some(Err(e)) => return Err(self.fail(run, task, started_at, SclError::from(e))),
            Some(Ok(evidence)) => {
                let keys = evidence.as_object().map_or(0, |o| o.len());
                run.tracer.trace_retrieval(keys);
                run.memory
                    .store_evidence(RETRIEVAL_EVIDENCE_ID, evidence.clone());
                run.loop_ctx.context.evidence = evidence;
                run.audit.record(
                    AuditEntry::system(AuditEventType::RetrievalCompleted, 0)
                        .with_payload(serde_json::json!({"evidence_keys": keys})),
                );
            }
        }

        let termination = loop {
            if run.loop_ctx.done {
                break TerminationReason::Completed;
            }
            if cancel.is_cancelled() {
                break aborted();
            }
            if run.loop_ctx.loop_counter >= self.config.max_loops {
                break TerminationReason::LoopLimitExceeded {
                    limit: self.config.max_loops,
                };
            }

            let cycle = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.run_cycle(&mut run) => Some(r),
            };
            match cycle {
                None => break aborted(),
                Some(Err(e)) => return Err(self.fail(run, task, started_at, e)),
                Some(Ok(())) => {}
            }
        };

        Ok(self.finish(run, task, started_at, termination))
    }

    async fn run_cycle(&self, run: &mut RunState) -> Result<(), SclError> {
        let control = Cycle::<Cognition>::begin(run)
            .cognize(self.cognition.as_ref())
            .await?;

        let record = match control.validate(&self.validator)? {
            Validated::Rejected(record) => record,
            Validated::Passed(gate) => match gate
                .gate(
                    &self.policy,
                    self.notifier.as_ref(),
                    self.decisions.as_ref(),
                    self.config.decision_timeout,
                )
                .await?
            {
                Gated::VirtualRejection(record) => record,
                Gated::Proceed(action) => {
                    action
                        .act(self.executor.as_ref(), self.config.tool_timeout)
                        .await?
                }
            },
        };

        record.record()?;
        Ok(())
    }

    /// Log a fatal error to the audit trail, then close out the run.
    fn fail(
        &self,
        mut run: RunState,
        task: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        error: SclError,
    ) -> RunFailure {
        tracing::error!(task_id = %run.task_id, error = %error, "Task run failed");
        let mut entry = AuditEntry::system(AuditEventType::Error, run.loop_ctx.loop_counter)
            .with_payload(serde_json::json!({"error": error.to_string()}));
        if let SclError::HumanDecisionUnavailable { freeze_id, .. } = &error {
            entry = entry.with_freeze(*freeze_id);
        }
        run.audit.record(entry);

        let termination = TerminationReason::Failed {
            error: error.to_string(),
        };
        RunFailure {
            error,
            report: Box::new(self.finish(run, task, started_at, termination)),
        }
    }

    /// Emit the terminal summary and assemble the report.
    fn finish(
        &self,
        mut run: RunState,
        task: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        termination: TerminationReason,
    ) -> RunReport {
        let total_loops = run.loop_ctx.loop_counter;
        let action_count = run.memory.action_count() as u64;
        let statistics = run.audit.statistics();
        run.audit.record(
            AuditEntry::system(AuditEventType::RunSummary, total_loops).with_payload(
                serde_json::json!({
                    "termination": termination,
                    "total_loops": total_loops,
                    "action_count": action_count,
                    "statistics": statistics,
                }),
            ),
        );
        run.tracer
            .trace_finished(&termination, total_loops, action_count);

        let audit = run.audit.export();
        RunReport {
            task_id: run.task_id,
            task: task.to_string(),
            termination,
            summary: RunSummary {
                total_loops,
                action_count,
                statistics: audit.statistics.clone(),
            },
            memory: run.memory.snapshot(),
            frozen_states: run.freezes.into_states(),
            audit,
            started_at,
            finished_at: chrono::Utc::now(),
        }
    }
}

fn aborted() -> TerminationReason {
    TerminationReason::Aborted {
        reason: "cancelled".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::decision::{AutoApprove, ChannelDecisionProvider};
    use crate::reasoning::cognition::ScriptedCognition;
    use crate::reasoning::executor::{ToolDescriptor, ToolRegistry};
    use crate::reasoning::loop_types::{CognitionOutput, ProposedAction};
    use crate::types::{DecisionError, RetrievalError};
    use async_trait::async_trait;
    use std::time::Duration;

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDescriptor::new("get_weather", "Weather").with_required(&["city"]),
            |_| Ok(serde_json::json!({"temperature": 72})),
        );
        registry.register(ToolDescriptor::new("send_email", "Email"), |_| {
            Ok(serde_json::json!("sent"))
        });
        Arc::new(registry)
    }

    fn weather() -> CognitionOutput {
        CognitionOutput::new("check", ProposedAction::new("get_weather").with_arg("city", "SF"))
    }

    #[tokio::test]
    async fn test_run_completes_on_final_action() {
        let engine = Arc::new(ScriptedCognition::new(vec![
            weather(),
            CognitionOutput::new("done", ProposedAction::new("send_email")).final_action(),
        ]));
        let controller = SclController::builder(engine, tools(), Arc::new(AutoApprove))
            .policy(Arc::new(PolicyEngine::new(PolicyConfig::permissive())))
            .build();

        let report = controller.run("trip").await.unwrap();
        assert_eq!(report.termination, TerminationReason::Completed);
        assert_eq!(report.summary.total_loops, 2);
        assert_eq!(report.memory.len(), 2);
        assert_eq!(
            report.audit.events.last().unwrap().event_type,
            AuditEventType::RunSummary
        );
        assert_eq!(report.audit.events[0].event_type, AuditEventType::RunStarted);
    }

    #[tokio::test]
    async fn test_cognition_unavailable_keeps_trace() {
        let engine = Arc::new(ScriptedCognition::new(vec![weather()]));
        let controller = SclController::builder(engine, tools(), Arc::new(AutoApprove))
            .policy(Arc::new(PolicyEngine::new(PolicyConfig::permissive())))
            .build();

        let failure = controller.run("trip").await.unwrap_err();
        assert!(matches!(failure.error, SclError::CognitionUnavailable { .. }));
        assert_eq!(failure.report.memory.len(), 1);
        assert!(matches!(
            failure.report.termination,
            TerminationReason::Failed { .. }
        ));
        let types: Vec<_> = failure
            .report
            .audit
            .events
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            &types[types.len() - 2..],
            &[AuditEventType::Error, AuditEventType::RunSummary]
        );
    }

    #[tokio::test]
    async fn test_decision_timeout_is_fatal_and_audited() {
        let engine = Arc::new(ScriptedCognition::repeating(CognitionOutput::new(
            "email",
            ProposedAction::new("send_email"),
        )));
        let (decisions, _rx) = ChannelDecisionProvider::new(None);
        let controller = SclController::builder(engine, tools(), Arc::new(decisions))
            .config(LoopConfig {
                decision_timeout: Some(Duration::from_millis(30)),
                ..LoopConfig::default()
            })
            .build();

        let failure = controller.run("trip").await.unwrap_err();
        assert!(matches!(
            failure.error,
            SclError::HumanDecisionUnavailable {
                source: DecisionError::Timeout { .. },
                ..
            }
        ));
        assert_eq!(
            failure
                .report
                .audit
                .events
                .iter()
                .filter(|e| e.event_type == AuditEventType::DecisionTimeout)
                .count(),
            1
        );
        assert_eq!(failure.report.summary.action_count, 0);
        assert!(failure.report.frozen_states[0].is_frozen());
    }

    struct FailingRetriever;

    #[async_trait]
    impl Retriever for FailingRetriever {
        async fn retrieve(&self, _task: &str) -> Result<serde_json::Value, RetrievalError> {
            Err(RetrievalError::new("index offline"))
        }
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_fatal() {
        let engine = Arc::new(ScriptedCognition::repeating(weather()));
        let controller = SclController::builder(engine, tools(), Arc::new(AutoApprove))
            .retriever(Arc::new(FailingRetriever))
            .build();

        let failure = controller.run("trip").await.unwrap_err();
        assert!(matches!(failure.error, SclError::RetrievalFailed(_)));
        assert_eq!(failure.report.summary.total_loops, 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_with_summary() {
        let engine = Arc::new(ScriptedCognition::repeating(CognitionOutput::new(
            "email",
            ProposedAction::new("send_email"),
        )));
        // Nobody answers, so the run parks at the first freeze.
        let (decisions, _rx) = ChannelDecisionProvider::new(None);
        let controller = SclController::builder(engine, tools(), Arc::new(decisions)).build();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let report = controller.run_with_cancel("trip", cancel).await.unwrap();
        assert!(matches!(report.termination, TerminationReason::Aborted { .. }));
        assert_eq!(
            report.audit.events.last().unwrap().event_type,
            AuditEventType::RunSummary
        );
        assert_eq!(report.summary.total_loops, 0);
    }

    #[tokio::test]
    async fn test_tool_timeout_is_recorded_not_fatal() {
        let mut registry = ToolRegistry::new();
        registry.register_async(ToolDescriptor::new("slow", "Slow tool"), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!(null))
        });
        let engine = Arc::new(ScriptedCognition::repeating(CognitionOutput::new(
            "wait",
            ProposedAction::new("slow"),
        )));
        let controller = SclController::builder(engine, Arc::new(registry), Arc::new(AutoApprove))
            .policy(Arc::new(PolicyEngine::new(PolicyConfig::permissive())))
            .config(LoopConfig {
                max_loops: 2,
                tool_timeout: Duration::from_millis(20),
                decision_timeout: None,
            })
            .build();

        let report = controller.run("wait").await.unwrap();
        assert_eq!(report.termination, TerminationReason::LoopLimitExceeded { limit: 2 });
        assert_eq!(report.memory.len(), 2);
        assert!(report
            .memory
            .iter()
            .all(|r| matches!(&r.outcome, crate::reasoning::loop_types::ActionOutcome::Failed { reason } if reason.contains("timed out"))));
    }
}
