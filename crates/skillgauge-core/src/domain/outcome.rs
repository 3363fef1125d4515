//! Result documents: per-attempt, per-task and per-run outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::{ExecutionResponse, TranscriptEvent};
use crate::graders::GraderKind;
use crate::statistics::ConfidenceInterval;

use super::trigger::TriggerMetrics;

/// Pass/fail/error status of a run or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Error,
}

impl Status {
    /// Task status from its runs: any error wins, then any failure.
    pub fn from_runs(runs: &[RunResult]) -> Self {
        if runs.iter().any(|r| r.status == Status::Error) {
            Status::Error
        } else if runs.iter().any(|r| r.status == Status::Failed) {
            Status::Failed
        } else {
            Status::Passed
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Error => "error",
        };
        f.write_str(s)
    }
}

/// One validator's verdict on one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraderResult {
    pub identifier: String,
    pub kind: GraderKind,
    /// Always within `[0, 1]`.
    pub score: f64,
    /// Effective weight; unset or non-positive declarations become 1.0.
    pub weight: f64,
    pub passed: bool,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub duration_ms: u64,
}

/// Condensed view of an agent session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDigest {
    pub total_turns: usize,
    pub tool_call_count: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tokens_total: u64,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub skills_invoked: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SessionDigest {
    pub fn from_response(response: &ExecutionResponse) -> Self {
        let mut errors: Vec<String> = response
            .transcript
            .iter()
            .filter(|e| e.is_error())
            .map(|e| e.content.clone())
            .collect();
        if let Some(err) = &response.error {
            errors.push(err.clone());
        }
        Self {
            total_turns: response.transcript.len(),
            tool_call_count: response.tool_calls.len(),
            tokens_in: response.token_usage.input,
            tokens_out: response.token_usage.output,
            tokens_total: response.token_usage.total(),
            tools_used: response.tool_calls.iter().map(|c| c.name.clone()).collect(),
            skills_invoked: response.skill_invocations.clone(),
            errors,
        }
    }
}

/// Outcome of one trial, after any retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    /// 1-based trial number in submission order.
    pub run_number: u32,
    /// Attempts consumed, including the final one.
    pub attempts: u32,
    pub status: Status,
    pub duration_ms: u64,
    /// Validator results keyed by validator name.
    #[serde(default)]
    pub validations: BTreeMap<String, GraderResult>,
    #[serde(default)]
    pub session_digest: SessionDigest,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transcript: Vec<TranscriptEvent>,
    #[serde(default)]
    pub final_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl RunResult {
    /// Error result with no validations.
    pub fn error(run_number: u32, attempts: u32, duration_ms: u64, msg: impl Into<String>) -> Self {
        Self {
            run_number,
            attempts,
            status: Status::Error,
            duration_ms,
            validations: BTreeMap::new(),
            session_digest: SessionDigest::default(),
            transcript: Vec::new(),
            final_output: String::new(),
            error_msg: Some(msg.into()),
        }
    }

    /// Unweighted mean of validator scores (0 with no validators).
    pub fn score(&self) -> f64 {
        if self.validations.is_empty() {
            return 0.0;
        }
        let total: f64 = self.validations.values().map(|v| v.score).sum();
        total / self.validations.len() as f64
    }

    /// Weight-normalized composite score.
    pub fn weighted_score(&self) -> f64 {
        composite_score(self.validations.values())
    }

    /// True when every validator passed (vacuously true with none).
    pub fn all_passed(&self) -> bool {
        self.validations.values().all(|v| v.passed)
    }
}

/// `Σ(score·w) / Σw` with non-positive weights counted as 1.0.
pub fn composite_score<'a>(results: impl IntoIterator<Item = &'a GraderResult>) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for r in results {
        let w = if r.weight > 0.0 { r.weight } else { 1.0 };
        weighted += r.score * w;
        total_weight += w;
    }
    if total_weight == 0.0 {
        0.0
    } else {
        weighted / total_weight
    }
}

/// Per-task statistics across trials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestStats {
    pub pass_rate: f64,
    pub avg_score: f64,
    pub avg_weighted_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub std_dev_score: f64,
    pub score_variance: f64,
    pub avg_duration_ms: u64,
    pub flaky: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci95_lo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci95_hi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_ci: Option<ConfidenceInterval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_significant: Option<bool>,
}

/// With-skill vs. baseline comparison for one task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SkillImpact {
    pub pass_rate_with_skills: f64,
    pub pass_rate_baseline: f64,
    pub delta: f64,
    pub percent_change: f64,
}

/// Aggregated outcome of all trials of one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestOutcome {
    pub test_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub runs: Vec<RunResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TestStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_impact: Option<SkillImpact>,
    /// Why the task produced no runs, e.g. a fatal `before_task` hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl TestOutcome {
    pub fn pass_rate(&self) -> f64 {
        self.stats.as_ref().map(|s| s.pass_rate).unwrap_or(0.0)
    }
}

/// Per-group breakdown in the digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupStats {
    pub name: String,
    pub passed: usize,
    pub total: usize,
    pub avg_score: f64,
}

/// Run-level statistical summary, present for multi-trial runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticalSummary {
    pub bootstrap_ci: ConfidenceInterval,
    pub is_significant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_gain: Option<f64>,
}

/// Run-level counts and scores.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutcomeDigest {
    pub total_tests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub success_rate: f64,
    pub aggregate_score: f64,
    pub weighted_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub std_dev: f64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupStats>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<StatisticalSummary>,
}

/// A named metric resolved against the digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricResult {
    pub identifier: String,
    pub value: f64,
    pub threshold: f64,
    pub passed: bool,
    pub weight: f64,
}

/// Configuration snapshot stored in the run document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeConfig {
    pub trials_per_task: u32,
    pub model: String,
    pub executor: String,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub parallel: bool,
    pub workers: usize,
    pub cache_enabled: bool,
}

/// The complete run document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationOutcome {
    pub eval_id: String,
    pub skill: String,
    pub eval_name: String,
    pub timestamp: DateTime<Utc>,
    pub config: OutcomeConfig,
    pub digest: OutcomeDigest,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricResult>,
    /// Task outcomes in spec-declared order.
    pub tasks: Vec<TestOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_metrics: Option<TriggerMetrics>,
    #[serde(default)]
    pub is_baseline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_outcome: Option<Box<EvaluationOutcome>>,
    #[serde(default)]
    pub canceled: bool,
}

impl EvaluationOutcome {
    /// Exit status for a finished run.
    pub fn exit_status(&self) -> ExitStatus {
        let task_failed = self.tasks.iter().any(|t| t.status != Status::Passed);
        let trigger_failed = self
            .metrics
            .get(crate::assembler::METRIC_TRIGGER_ACCURACY)
            .is_some_and(|m| !m.passed);
        if task_failed || trigger_failed || self.canceled {
            ExitStatus::GradingFailed
        } else {
            ExitStatus::Passed
        }
    }
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every task passed.
    Passed,
    /// At least one task failed or errored, or a gating metric failed.
    GradingFailed,
    /// Configuration or pre-run error.
    ConfigError,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Passed => 0,
            ExitStatus::GradingFailed => 1,
            ExitStatus::ConfigError => 2,
        }
    }
}
