//! Error taxonomy for the structured cognitive loop
//!
//! Errors fall into four groups:
//! - recoverable within the loop (control failures, tool failures), which
//!   never surface here because they become context patches;
//! - HITL protocol violations (`HitlError`), always fatal to the run;
//! - run-terminal but non-fatal (`LoopLimitExceeded`, `Cancelled`);
//! - fatal collaborator failures (`CognitionUnavailable`, snapshot failures).

use std::time::Duration;
use thiserror::Error;

use super::FreezeId;

/// Top-level error for a task run.
#[derive(Error, Debug, Clone)]
pub enum SclError {
    #[error("Cognition engine unavailable: {message}")]
    CognitionUnavailable { message: String },

    #[error("Retrieval failed: {0}")]
    RetrievalFailed(#[from] RetrievalError),

    #[error("Human decision unavailable for {freeze_id}: {source}")]
    HumanDecisionUnavailable {
        freeze_id: FreezeId,
        #[source]
        source: DecisionError,
    },

    #[error("HITL protocol error: {0}")]
    Hitl(#[from] HitlError),

    #[error("Loop limit of {limit} cycles exceeded")]
    LoopLimitExceeded { limit: u64 },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run failed: {message}")]
    RunFailed { message: String },
}

/// Freeze/thaw protocol violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HitlError {
    #[error("A frozen state is already outstanding: {outstanding}")]
    AlreadyFrozen { outstanding: FreezeId },

    #[error("Unknown frozen state: {0}")]
    UnknownFreeze(FreezeId),

    #[error("Frozen state already resolved: {0}")]
    AlreadyResolved(FreezeId),

    #[error("Modify decision for {0} carries no modified action")]
    MissingModifiedAction(FreezeId),

    #[error("Frozen state {0} was not resolved with a rejection")]
    NotRejected(FreezeId),

    #[error("State snapshot failed: {message}")]
    SnapshotFailed { message: String },
}

/// Failures of the human-decision collaborator.
#[derive(Error, Debug, Clone)]
pub enum DecisionError {
    #[error("Decision timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Decision channel closed")]
    ChannelClosed,

    #[error("Decision input error: {0}")]
    Io(String),

    #[error("Invalid decision input: {0}")]
    InvalidInput(String),
}

/// Failures of the cognition engine.
#[derive(Error, Debug, Clone)]
pub enum CognitionError {
    #[error("Cognition engine unavailable: {0}")]
    Unavailable(String),

    #[error("Cognition engine returned invalid output: {0}")]
    InvalidOutput(String),
}

/// Failure of a single tool execution. Recorded in memory, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    #[error("Tool '{0}' is not registered")]
    UnknownTool(String),

    #[error("Tool '{tool}' failed: {reason}")]
    Failed { tool: String, reason: String },

    #[error("Tool '{tool}' timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },
}

/// Failure of the retrieval collaborator.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct RetrievalError {
    pub message: String,
}

impl RetrievalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
