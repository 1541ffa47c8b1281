//! Core identifiers for the structured cognitive loop

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod error;

pub use error::*;

/// Unique identifier for a single task run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Error parsing a sequential identifier such as `FREEZE-0003`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} identifier: {value}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub value: String,
}

fn parse_sequential(prefix: &str, kind: &'static str, value: &str) -> Result<u64, IdParseError> {
    value
        .strip_prefix(prefix)
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| IdParseError {
            kind,
            value: value.to_string(),
        })
}

/// Identifier of a frozen state, assigned monotonically per run (`FREEZE-%04d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FreezeId(pub u64);

impl fmt::Display for FreezeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREEZE-{:04}", self.0)
    }
}

impl FromStr for FreezeId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_sequential("FREEZE-", "freeze", s).map(Self)
    }
}

impl From<FreezeId> for String {
    fn from(id: FreezeId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for FreezeId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Identifier of an audit event, assigned monotonically per run (`HITL-%04d`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TraceId(pub u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HITL-{:04}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_sequential("HITL-", "trace", s).map(Self)
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TraceId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
