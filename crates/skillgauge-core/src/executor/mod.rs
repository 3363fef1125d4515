//! Agent-executor contract.
//!
//! The engine treats the agent as a black box behind [`AgentExecutor`]:
//! it hands over a prompt and a private workspace, and gets back the final
//! output, a transcript, tool calls, skill invocations and token usage.
//!
//! - [`mock`] — `MockExecutor`, the in-tree scriptable implementation

pub mod mock;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use mock::{MockExecutor, MockReply};

/// Errors surfaced by an executor call.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("execution timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("executor failed: {0}")]
    Failed(String),

    #[error("execution canceled")]
    Canceled,
}

/// One entry in the agent session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEvent {
    /// Event type, e.g. `assistant.message` or `tool.error`.
    pub kind: String,

    #[serde(default)]
    pub content: String,
}

impl TranscriptEvent {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }

    /// Whether this event records an error.
    pub fn is_error(&self) -> bool {
        self.kind.contains("error")
    }
}

/// A tool invocation made by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: serde_json::Value::Null,
        }
    }
}

/// Token accounting for one execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// Everything the executor needs for one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub prompt: String,
    pub context: BTreeMap<String, serde_json::Value>,
    /// Private, writable copy of the task fixtures.
    pub workspace_dir: PathBuf,
    /// Skill under test; `None` on a baseline pass.
    pub skill: Option<String>,
    pub skill_paths: Vec<PathBuf>,
    pub model: String,
    pub timeout: Duration,
}

/// What an executor returns for one attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResponse {
    pub final_output: String,

    #[serde(default)]
    pub transcript: Vec<TranscriptEvent>,

    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Names of skills the agent invoked, in invocation order.
    #[serde(default)]
    pub skill_invocations: Vec<String>,

    #[serde(default)]
    pub token_usage: TokenUsage,

    #[serde(default)]
    pub model_id: String,

    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

/// Black-box agent executor.
///
/// Implementations must be safe to call from several workers at once.
/// The engine bounds every `execute` call with the trial deadline and drops
/// the future on expiry or cancellation.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executor identity, recorded in the fingerprint and config snapshot.
    fn name(&self) -> &str;

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse, ExecutorError>;

    async fn shutdown(&self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_error_display() {
        let err = ExecutorError::Timeout { seconds: 30 };
        assert_eq!(err.to_string(), "execution timed out after 30s");
        assert!(ExecutorError::Failed("boom".into())
            .to_string()
            .contains("boom"));
    }

    #[test]
    fn test_transcript_error_detection() {
        assert!(TranscriptEvent::new("tool.error", "x").is_error());
        assert!(!TranscriptEvent::new("assistant.message", "error-free").is_error());
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input: 120,
            output: 30,
        };
        assert_eq!(usage.total(), 150);
    }
}
