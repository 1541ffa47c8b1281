//! Prelude for wiring a controller.
//!
//! ```ignore
//! use scl_runtime::prelude::*;
//! ```

// Loop and report types
pub use crate::reasoning::{
    ActionOutcome, CognitionOutput, LoopConfig, ProposedAction, RunFailure, RunReport,
    SclController, TerminationReason, ToolArguments,
};

// Collaborator traits
pub use crate::hitl::{HumanDecisionProvider, Notifier, PolicyRule};
pub use crate::reasoning::{CognitionEngine, Retriever, ToolExecutor};

// Default implementations
pub use crate::hitl::{AutoApprove, ConsoleDecisionProvider, LogNotifier, PolicyConfig, PolicyEngine};
pub use crate::reasoning::{ScriptedCognition, StaticRetriever, ToolDescriptor, ToolRegistry};

pub use crate::config::SclConfig;
pub use crate::types::{FreezeId, SclError, TaskId};
