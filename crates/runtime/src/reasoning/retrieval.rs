//! Evidence retrieval, run once at task start

use async_trait::async_trait;

use crate::types::RetrievalError;

/// Produces the static evidence blob for a task.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, task: &str) -> Result<serde_json::Value, RetrievalError>;
}

/// Returns the same blob for every task.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    evidence: serde_json::Value,
}

impl StaticRetriever {
    pub fn new(evidence: serde_json::Value) -> Self {
        Self { evidence }
    }

    /// No evidence at all.
    pub fn empty() -> Self {
        Self::new(serde_json::json!({}))
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, task: &str) -> Result<serde_json::Value, RetrievalError> {
        tracing::debug!(task_len = task.len(), "Static retrieval");
        Ok(self.evidence.clone())
    }
}
