//! Human-in-the-loop subsystem
//!
//! Decides *whether* a proposed action needs a human (`policy`), captures
//! and restores loop state around the decision (`freeze`), obtains the
//! decision itself (`decision`), and fans out non-blocking notices
//! (`notifier`).

pub mod decision;
pub mod freeze;
pub mod notifier;
pub mod policy;

pub use decision::{
    AutoApprove, ChannelDecisionProvider, ConsoleDecisionProvider, DecisionRequest,
    HumanDecisionProvider, PendingDecision, ScriptedDecision, ScriptedDecisionProvider,
};
pub use freeze::{
    Decision, FreezeStatus, FreezeThawManager, FrozenState, HumanDecision, NextStep,
    ResolvedOutcome, VirtualRejectionCycle,
};
pub use notifier::{ChannelNotifier, InterventionNotice, LogNotifier, Notifier};
pub use policy::{
    InterventionLevel, PolicyConfig, PolicyEngine, PolicyInput, PolicyRule, PolicyVerdict,
};
