//! Error types for benchmark configuration and run setup.

use std::path::PathBuf;

/// Errors detected before or around task execution.
///
/// Every variant except [`SkillGaugeError::Canceled`] aborts the run with
/// exit code 2. Executor, grader and cache failures have their own error
/// types and are absorbed into the outcome document instead.
#[derive(Debug, thiserror::Error)]
pub enum SkillGaugeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid benchmark spec: {0}")]
    InvalidSpec(String),

    #[error("invalid task {task}: {reason}")]
    InvalidTask { task: String, reason: String },

    #[error("invalid grader {grader}: {reason}")]
    InvalidGrader { grader: String, reason: String },

    #[error("unresolved path {}: {reason}", path.display())]
    UnresolvedPath { path: PathBuf, reason: String },

    #[error("baseline mismatch: {0}")]
    BaselineMismatch(String),

    #[error("hook failed: {0}")]
    Hook(String),

    #[error("run canceled")]
    Canceled,

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SkillGaugeError {
    pub(crate) fn invalid_grader(grader: &str, reason: impl Into<String>) -> Self {
        Self::InvalidGrader {
            grader: grader.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_task(task: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            task: task.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for configuration and orchestration operations.
pub type Result<T> = std::result::Result<T, SkillGaugeError>;
