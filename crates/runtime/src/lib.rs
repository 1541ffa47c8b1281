//! Structured Cognitive Loop runtime
//!
//! Runs a task through repeated cognition → control → HITL gate → action
//! cycles. Risky actions freeze the loop until a human approves, modifies
//! or rejects them; rejections become virtual cycles that feed the
//! reviewer's reasoning back into the next cognition call. Every event is
//! kept in a task-scoped glassbox audit log.

pub mod audit;
pub mod config;
pub mod hitl;
pub mod prelude;
pub mod reasoning;
pub mod types;

// Re-export commonly used types
pub use audit::{AuditEventType, AuditExport, AuditLog, AuditStatistics};
pub use config::{ConfigError, HitlMode, LogFormat, SclConfig};
pub use hitl::{FreezeThawManager, FrozenState, HumanDecision, InterventionLevel, PolicyEngine};
pub use reasoning::{RunFailure, RunReport, SclController, TerminationReason};
pub use types::*;
