//! Structured Cognitive Loop
//!
//! Retrieval once, then cycles of cognition, control validation, HITL
//! gating, action and memory update. Phase order is enforced at compile
//! time by the typestate in `phases`.

pub mod cognition;
pub mod context;
pub mod control;
pub mod controller;
pub mod executor;
pub mod loop_types;
pub mod memory;
pub mod phases;
pub mod retrieval;
pub mod tracing_spans;

pub use cognition::{CognitionEngine, HttpCognitionConfig, HttpCognitionEngine, ScriptedCognition};
pub use context::{ContextPatch, LoopContext, TaskContext};
pub use control::{ControlConfig, ControlValidator, ControlVerdict, ForbiddenRule, ToolSpec};
pub use controller::{SclController, SclControllerBuilder};
pub use executor::{ToolDescriptor, ToolExecutor, ToolRegistry};
pub use loop_types::{
    ActionOutcome, ActionRecord, CognitionOutput, LoopConfig, ProposedAction, RunFailure,
    RunReport, RunSummary, TerminationReason, ToolArguments,
};
pub use memory::Memory;
pub use retrieval::{Retriever, StaticRetriever};
pub use tracing_spans::CycleTracer;
