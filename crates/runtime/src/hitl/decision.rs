//! Human-decision collaborators
//!
//! The controller hands a `FrozenState` to a `HumanDecisionProvider` and
//! suspends until it answers. Which provider runs is chosen when the run
//! is configured: a console prompt, an auto-approver, a channel round-trip
//! to some other transport, or a script for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::hitl::freeze::{Decision, FrozenState, HumanDecision};
use crate::reasoning::loop_types::{ProposedAction, ToolArguments};
use crate::types::{DecisionError, FreezeId};

const MAX_CONSOLE_ATTEMPTS: usize = 3;

/// Source of human decisions for frozen states.
#[async_trait]
pub trait HumanDecisionProvider: Send + Sync {
    /// Block until a decision for `state` is available.
    async fn request_decision(&self, state: &FrozenState) -> Result<HumanDecision, DecisionError>;

    /// Short name for logs and audit payloads.
    fn provider_type(&self) -> &str;
}

/// Approves everything. Used for unattended runs.
#[derive(Debug, Clone, Default)]
pub struct AutoApprove;

#[async_trait]
impl HumanDecisionProvider for AutoApprove {
    async fn request_decision(&self, state: &FrozenState) -> Result<HumanDecision, DecisionError> {
        Ok(HumanDecision::approve(state.freeze_id, "Auto-approved").with_reviewer("auto"))
    }

    fn provider_type(&self) -> &str {
        "auto"
    }
}

/// One scripted answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedDecision {
    Approve,
    Reject(String),
    Modify(ProposedAction),
}

/// Replays scripted answers in order, approving once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedDecisionProvider {
    script: Mutex<VecDeque<ScriptedDecision>>,
    seen: Mutex<Vec<FrozenState>>,
}

impl ScriptedDecisionProvider {
    pub fn new(script: impl IntoIterator<Item = ScriptedDecision>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Frozen states this provider was asked about, in order.
    pub async fn requests(&self) -> Vec<FrozenState> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl HumanDecisionProvider for ScriptedDecisionProvider {
    async fn request_decision(&self, state: &FrozenState) -> Result<HumanDecision, DecisionError> {
        self.seen.lock().await.push(state.clone());
        let next = self.script.lock().await.pop_front();
        let decision = match next {
            None | Some(ScriptedDecision::Approve) => {
                HumanDecision::approve(state.freeze_id, "Scripted approval")
            }
            Some(ScriptedDecision::Reject(reason)) => HumanDecision::reject(state.freeze_id, reason),
            Some(ScriptedDecision::Modify(action)) => {
                HumanDecision::modify(state.freeze_id, action, "Scripted modification")
            }
        };
        Ok(decision.with_reviewer("script"))
    }

    fn provider_type(&self) -> &str {
        "scripted"
    }
}

/// A decision request sent out over a channel.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub freeze_id: FreezeId,
    pub state: FrozenState,
    pub requested_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Request plus the channel its answer goes back on.
pub type PendingDecision = (DecisionRequest, oneshot::Sender<HumanDecision>);

/// Sends requests to whatever transport drains the receiver and waits for
/// the answer, optionally bounded by a timeout.
pub struct ChannelDecisionProvider {
    sender: mpsc::Sender<PendingDecision>,
    timeout: Option<Duration>,
}

impl ChannelDecisionProvider {
    /// Create the provider and the receiver a transport should drain.
    pub fn new(timeout: Option<Duration>) -> (Self, mpsc::Receiver<PendingDecision>) {
        let (tx, rx) = mpsc::channel(32);
        (
            Self {
                sender: tx,
                timeout,
            },
            rx,
        )
    }
}

#[async_trait]
impl HumanDecisionProvider for ChannelDecisionProvider {
    async fn request_decision(&self, state: &FrozenState) -> Result<HumanDecision, DecisionError> {
        let now = Utc::now();
        let request = DecisionRequest {
            freeze_id: state.freeze_id,
            state: state.clone(),
            requested_at: now,
            deadline: self
                .timeout
                .and_then(|t| chrono::Duration::from_std(t).ok())
                .map(|t| now + t),
        };

        let (response_tx, response_rx) = oneshot::channel();
        self.sender
            .send((request, response_tx))
            .await
            .map_err(|_| DecisionError::ChannelClosed)?;

        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, response_rx).await {
                Ok(Ok(decision)) => Ok(decision),
                Ok(Err(_)) => Err(DecisionError::ChannelClosed),
                Err(_) => Err(DecisionError::Timeout { timeout }),
            },
            None => response_rx.await.map_err(|_| DecisionError::ChannelClosed),
        }
    }

    fn provider_type(&self) -> &str {
        "channel"
    }
}

struct ConsoleIo<R, W> {
    lines: Lines<R>,
    out: W,
}

/// Line-oriented prompt: `A`pprove, `R`eject, or `M`odify with JSON arguments.
pub struct ConsoleDecisionProvider<R, W> {
    io: Mutex<ConsoleIo<R, W>>,
    reviewer: String,
}

impl ConsoleDecisionProvider<BufReader<tokio::io::Stdin>, tokio::io::Stderr> {
    /// Prompt on stderr, read answers from stdin.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl<R, W> ConsoleDecisionProvider<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new(ConsoleIo {
                lines: reader.lines(),
                out: writer,
            }),
            reviewer: "console".into(),
        }
    }

    pub fn with_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.reviewer = reviewer.into();
        self
    }
}

impl<R, W> ConsoleIo<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn say(&mut self, text: &str) -> Result<(), DecisionError> {
        self.out
            .write_all(text.as_bytes())
            .await
            .map_err(|e| DecisionError::Io(e.to_string()))?;
        self.out
            .flush()
            .await
            .map_err(|e| DecisionError::Io(e.to_string()))
    }

    async fn ask(&mut self, prompt: &str) -> Result<String, DecisionError> {
        self.say(prompt).await?;
        match self.lines.next_line().await {
            Ok(Some(line)) => Ok(line.trim().to_string()),
            Ok(None) => Err(DecisionError::ChannelClosed),
            Err(e) => Err(DecisionError::Io(e.to_string())),
        }
    }
}

fn parse_choice(input: &str) -> Option<Decision> {
    match input.to_ascii_uppercase().as_str() {
        "A" | "APPROVE" => Some(Decision::Approve),
        "R" | "REJECT" => Some(Decision::Reject),
        "M" | "MODIFY" => Some(Decision::Modify),
        _ => None,
    }
}

#[async_trait]
impl<R, W> HumanDecisionProvider for ConsoleDecisionProvider<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request_decision(&self, state: &FrozenState) -> Result<HumanDecision, DecisionError> {
        let mut io = self.io.lock().await;
        io.say(&format!(
            "\n=== HUMAN INTERVENTION REQUIRED ===\n{}\n",
            state.summary()
        ))
        .await?;

        let allowed = state.allowed_decisions();
        for _ in 0..MAX_CONSOLE_ATTEMPTS {
            let answer = io.ask("Your decision (A/R/M): ").await?;
            let Some(choice) = parse_choice(&answer).filter(|c| allowed.contains(c)) else {
                io.say("Invalid choice.\n").await?;
                continue;
            };

            let decision = match choice {
                Decision::Approve => {
                    let rationale = io.ask("Rationale (optional): ").await?;
                    HumanDecision::approve(state.freeze_id, rationale)
                }
                Decision::Reject => {
                    let reason = io.ask("Rejection reason: ").await?;
                    HumanDecision::reject(state.freeze_id, reason)
                }
                Decision::Modify => {
                    let raw = io.ask("Modified arguments (JSON object): ").await?;
                    match serde_json::from_str::<ToolArguments>(&raw) {
                        Ok(arguments) => HumanDecision::modify(
                            state.freeze_id,
                            ProposedAction {
                                tool_name: state.pending_action().tool_name.clone(),
                                arguments,
                            },
                            "Human modified action arguments",
                        ),
                        Err(e) => {
                            io.say(&format!("Invalid JSON: {e}\n")).await?;
                            continue;
                        }
                    }
                }
            };
            return Ok(decision.with_reviewer(self.reviewer.clone()));
        }

        Err(DecisionError::InvalidInput(format!(
            "no valid decision after {MAX_CONSOLE_ATTEMPTS} attempts"
        )))
    }

    fn provider_type(&self) -> &str {
        "console"
    }
}
