//! Benchmark specification: the immutable configuration of one evaluation run.

use serde::{Deserialize, Serialize};

use super::error::{Result, SkillGaugeError};
use crate::graders::GraderSpec;
use crate::hooks::HooksConfig;

/// Default number of concurrent workers when `parallel` is enabled.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default executor identity.
pub const DEFAULT_EXECUTOR: &str = "mock";

fn default_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_executor() -> String {
    DEFAULT_EXECUTOR.to_string()
}

fn default_attempts() -> u32 {
    1
}

fn default_metric_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Execution settings from the `config:` block of a benchmark spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Trials executed per task (must be at least 1).
    #[serde(default)]
    pub trials_per_task: u32,

    /// Per-trial deadline in seconds (must be at least 1).
    #[serde(default)]
    pub timeout_seconds: u64,

    /// Run tasks on a bounded worker pool instead of sequentially.
    #[serde(default)]
    pub parallel: bool,

    /// Worker pool size when `parallel` is set.
    #[serde(default = "default_workers")]
    pub max_workers: usize,

    /// Stop dispatching new tasks once a task ends in error.
    #[serde(default)]
    pub fail_fast: bool,

    /// Agent executor identity.
    #[serde(default = "default_executor")]
    pub executor: String,

    /// Model identifier handed to the executor.
    #[serde(default)]
    pub model: String,

    /// Skill directories made available to the agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_directories: Vec<String>,

    /// Skills the agent must have loaded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_skills: Vec<String>,

    /// Attempt limit per trial; a failed grading re-runs the whole attempt.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    /// Grouping dimension for digest breakdowns (only `model` is supported).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,

    /// Fixture directory, relative to the spec file (default `fixtures`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixtures_dir: Option<String>,
}

impl RunConfig {
    /// Attempt limit clamped to at least one attempt.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Worker pool size clamped to at least one worker.
    pub fn effective_workers(&self) -> usize {
        if self.max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            self.max_workers
        }
    }
}

/// A named metric with a pass threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDef {
    pub name: String,

    #[serde(default = "default_metric_weight")]
    pub weight: f64,

    #[serde(default)]
    pub threshold: f64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A complete benchmark specification as loaded from YAML.
///
/// Loaded once per run and never mutated afterwards; the baseline pass
/// works on a stripped clone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Skill under evaluation.
    #[serde(default)]
    pub skill: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Compare a with-skill run against a skills-stripped run.
    #[serde(default)]
    pub baseline: bool,

    pub config: RunConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    /// Validators applied to every task.
    #[serde(default)]
    pub graders: Vec<GraderSpec>,

    #[serde(default)]
    pub metrics: Vec<MetricDef>,

    /// Glob patterns, relative to the spec file, naming task files.
    #[serde(default)]
    pub tasks: Vec<String>,

    /// Dataset file whose rows generate tasks; replaces `tasks` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_from: Option<String>,
}

impl BenchmarkSpec {
    /// Parse and validate a spec from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let spec: BenchmarkSpec = serde_yaml::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check the structural invariants of the spec.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SkillGaugeError::InvalidSpec(
                "name must not be empty".to_string(),
            ));
        }
        if self.config.trials_per_task < 1 {
            return Err(SkillGaugeError::Config(format!(
                "trials_per_task must be at least 1, got {}",
                self.config.trials_per_task
            )));
        }
        if self.config.timeout_seconds < 1 {
            return Err(SkillGaugeError::Config(format!(
                "timeout_seconds must be at least 1, got {}",
                self.config.timeout_seconds
            )));
        }
        if let Some(group_by) = &self.config.group_by {
            if group_by != "model" {
                return Err(SkillGaugeError::Config(format!(
                    "unsupported group_by dimension {group_by:?} (supported: model)"
                )));
            }
        }
        for grader in &self.graders {
            grader.validate()?;
        }
        self.hooks.validate()?;
        Ok(())
    }

    /// Whether any skill source is configured; baseline runs need one.
    pub fn has_skills(&self) -> bool {
        !self.config.skill_directories.is_empty() || !self.config.required_skills.is_empty()
    }

    /// Copy of this spec with every skill source removed.
    pub fn without_skills(&self) -> Self {
        let mut stripped = self.clone();
        stripped.config.skill_directories.clear();
        stripped.config.required_skills.clear();
        stripped
    }

    /// Threshold that bootstrap intervals are tested against.
    ///
    /// Uses the first enabled metric's threshold, or zero when none is set.
    pub fn significance_threshold(&self) -> f64 {
        self.metrics
            .iter()
            .find(|m| m.enabled)
            .map(|m| m.threshold)
            .unwrap_or(0.0)
    }

    /// Group label for task outcomes under the configured dimension.
    pub fn group_label(&self) -> Option<String> {
        match self.config.group_by.as_deref() {
            Some("model") => Some(self.config.model.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: test-benchmark
description: Test benchmark spec
skill: test-skill
version: "1.0"
config:
  trials_per_task: 2
  timeout_seconds: 120
  executor: mock
  model: test-model
"#;

    #[test]
    fn test_minimal_spec_loads_with_defaults() {
        let spec = BenchmarkSpec::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(spec.name, "test-benchmark");
        assert_eq!(spec.skill, "test-skill");
        assert_eq!(spec.config.trials_per_task, 2);
        assert_eq!(spec.config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(spec.config.max_attempts, 1);
        assert!(!spec.config.parallel);
        assert!(spec.graders.is_empty());
    }

    #[test]
    fn test_zero_trials_rejected() {
        let yaml = MINIMAL.replace("trials_per_task: 2", "trials_per_task: 0");
        let err = BenchmarkSpec::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("trials_per_task must be at least 1"));
    }

    #[test]
    fn test_missing_timeout_rejected() {
        let yaml = MINIMAL.replace("  timeout_seconds: 120\n", "");
        let err = BenchmarkSpec::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("timeout_seconds must be at least 1"));
    }

    #[test]
    fn test_negative_trials_is_parse_error() {
        let yaml = MINIMAL.replace("trials_per_task: 2", "trials_per_task: -1");
        assert!(matches!(
            BenchmarkSpec::from_yaml_str(&yaml),
            Err(SkillGaugeError::Yaml(_))
        ));
    }

    #[test]
    fn test_unsupported_group_by_rejected() {
        let yaml = format!("{MINIMAL}  group_by: region\n");
        let err = BenchmarkSpec::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("group_by"));
    }

    #[test]
    fn test_significance_threshold_uses_first_enabled_metric() {
        let yaml = format!(
            "{MINIMAL}metrics:\n  - name: off\n    threshold: 0.9\n    enabled: false\n  - name: task_completion\n    threshold: 0.7\n"
        );
        let spec = BenchmarkSpec::from_yaml_str(&yaml).unwrap();
        assert!((spec.significance_threshold() - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_without_skills_strips_sources() {
        let yaml = MINIMAL.replace(
            "  model: test-model\n",
            "  model: test-model\n  skill_directories: [skills]\n  required_skills: [azure]\n",
        );
        let spec = BenchmarkSpec::from_yaml_str(&yaml).unwrap();
        assert!(spec.has_skills());
        let stripped = spec.without_skills();
        assert!(!stripped.has_skills());
        assert!(spec.has_skills());
    }

    #[test]
    fn test_group_label_model() {
        let yaml = format!("{MINIMAL}  group_by: model\n");
        let spec = BenchmarkSpec::from_yaml_str(&yaml).unwrap();
        assert_eq!(spec.group_label().as_deref(), Some("test-model"));
    }
}
