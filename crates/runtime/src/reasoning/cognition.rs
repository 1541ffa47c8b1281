//! Cognition engines
//!
//! The loop treats reasoning as an opaque function from task context and
//! memory to a `CognitionOutput`. Two backends ship here: a scripted one
//! for deterministic runs and an OpenAI-compatible HTTP one.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::reasoning::context::TaskContext;
use crate::reasoning::executor::ToolDescriptor;
use crate::reasoning::loop_types::{ActionRecord, CognitionOutput, ProposedAction, ToolArguments};
use crate::types::CognitionError;

/// Standing instructions sent with every governed prompt.
pub const GOVERNANCE_INSTRUCTIONS: &str = "\
You are operating under soft symbolic control within a structured cognitive loop.

MANDATORY CONSTRAINTS:
1. Always consult memory before proposing actions.
2. Cite evidence from retrieval or memory in all reasoning.
3. Avoid redundant tool calls by checking memory first.
4. High-risk actions require human approval.
5. When human feedback is present, incorporate it and do not repeat a rejected proposal.

Respond with a single JSON object with the fields:
- reasoning: your thought process
- proposed_action: {\"tool_name\": string, \"arguments\": object}
- evidence_refs: list of evidence ids used
- is_final: true if executing this action completes the task
- confidence: number between 0 and 1";

/// Produces the next proposed action.
#[async_trait]
pub trait CognitionEngine: Send + Sync {
    async fn invoke(
        &self,
        context: &TaskContext,
        memory: &[ActionRecord],
    ) -> Result<CognitionOutput, CognitionError>;
}

/// Replays a fixed list of outputs.
///
/// Every context it is called with is kept so tests can check what the
/// engine saw, e.g. human feedback after a virtual rejection.
#[derive(Debug, Default)]
pub struct ScriptedCognition {
    script: Mutex<VecDeque<CognitionOutput>>,
    repeat_last: bool,
    seen: Mutex<Vec<TaskContext>>,
}

impl ScriptedCognition {
    /// Fails with `Unavailable` once the script runs out.
    pub fn new(script: impl IntoIterator<Item = CognitionOutput>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            repeat_last: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns `output` forever.
    pub fn repeating(output: CognitionOutput) -> Self {
        Self {
            repeat_last: true,
            ..Self::new([output])
        }
    }

    pub async fn contexts(&self) -> Vec<TaskContext> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl CognitionEngine for ScriptedCognition {
    async fn invoke(
        &self,
        context: &TaskContext,
        _memory: &[ActionRecord],
    ) -> Result<CognitionOutput, CognitionError> {
        self.seen.lock().await.push(context.clone());
        let mut script = self.script.lock().await;
        let next = if self.repeat_last && script.len() == 1 {
            script.front().cloned()
        } else {
            script.pop_front()
        };
        next.ok_or_else(|| CognitionError::Unavailable("cognition script exhausted".into()))
    }
}

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpCognitionConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for HttpCognitionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o".into(),
            temperature: 0.2,
            timeout: Duration::from_secs(120),
        }
    }
}

impl HttpCognitionConfig {
    /// Read `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `CHAT_MODEL`.
    /// Returns `None` when no API key is set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        let defaults = Self::default();
        Some(Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: Some(api_key),
            model: std::env::var("CHAT_MODEL").unwrap_or(defaults.model),
            ..defaults
        })
    }
}

/// Shape the model is asked to answer in. Field aliases accept the
/// common variants models produce.
#[derive(Debug, Deserialize)]
struct ModelReply {
    #[serde(default)]
    reasoning: String,
    proposed_action: ModelAction,
    #[serde(default)]
    evidence_refs: Vec<String>,
    #[serde(default, alias = "is_final_action")]
    is_final: bool,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct ModelAction {
    tool_name: String,
    #[serde(default, alias = "parameters")]
    arguments: ToolArguments,
}

fn default_confidence() -> f64 {
    0.5
}

/// Chat-completions backed cognition.
pub struct HttpCognitionEngine {
    client: reqwest::Client,
    config: HttpCognitionConfig,
    tools: Vec<ToolDescriptor>,
}

impl HttpCognitionEngine {
    pub fn new(config: HttpCognitionConfig) -> Result<Self, CognitionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CognitionError::Unavailable(format!("HTTP client error: {e}")))?;
        Ok(Self {
            client,
            config,
            tools: Vec::new(),
        })
    }

    /// Tools listed in the prompt.
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// The user message for one cognition call.
    pub fn build_prompt(&self, context: &TaskContext, memory: &[ActionRecord]) -> String {
        let mut prompt = String::new();

        if let Some(feedback) = &context.human_feedback {
            prompt.push_str(&format!(
                "HUMAN FEEDBACK (incorporate this):\n- Previous proposal was rejected: {}\n- Reason: {}\n- Guidance: {}\n\n",
                feedback.previous_proposal.tool_name,
                feedback.rejection_reason,
                feedback.retry_guidance
            ));
        }

        let executed = memory.iter().filter(|r| r.outcome.was_executed()).count();
        let recent: Vec<_> = memory.iter().rev().take(5).collect();
        let state = serde_json::json!({
            "loop_count": memory.len(),
            "action_count": executed,
            "recent_actions": recent,
        });
        prompt.push_str(&format!(
            "CURRENT STATE:\n{}\n\n",
            serde_json::to_string_pretty(&state).unwrap_or_default()
        ));
        prompt.push_str(&format!(
            "AVAILABLE TOOLS:\n{}\n\n",
            serde_json::to_string_pretty(&self.tools).unwrap_or_default()
        ));
        prompt.push_str(&format!(
            "CONTEXT:\n{}\n\n",
            serde_json::to_string_pretty(context).unwrap_or_default()
        ));
        prompt.push_str("Determine the next action, the evidence supporting it, and whether all of its conditions are met.");
        prompt
    }

    fn parse_reply(content: &str) -> Result<CognitionOutput, CognitionError> {
        let trimmed = content.trim();
        let json = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim();

        let reply: ModelReply = serde_json::from_str(json)
            .map_err(|e| CognitionError::InvalidOutput(format!("reply is not valid JSON: {e}")))?;

        Ok(CognitionOutput {
            reasoning: reply.reasoning,
            proposed_action: ProposedAction {
                tool_name: reply.proposed_action.tool_name,
                arguments: reply.proposed_action.arguments,
            },
            confidence: reply.confidence,
            evidence_refs: reply.evidence_refs,
            is_final: reply.is_final,
        })
    }
}

#[async_trait]
impl CognitionEngine for HttpCognitionEngine {
    async fn invoke(
        &self,
        context: &TaskContext,
        memory: &[ActionRecord],
    ) -> Result<CognitionOutput, CognitionError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": GOVERNANCE_INSTRUCTIONS},
                {"role": "user", "content": self.build_prompt(context, memory)},
            ],
        });

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CognitionError::Unavailable(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CognitionError::Unavailable(format!(
                "endpoint returned {status}: {text}"
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CognitionError::InvalidOutput(format!("response body: {e}")))?;
        let content = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| CognitionError::InvalidOutput("no message content in response".into()))?;

        tracing::debug!(model = %self.config.model, "Cognition reply received");
        Self::parse_reply(content)
    }
}
