//! Task definitions: one evaluation unit loaded from a task YAML file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{Result, SkillGaugeError};
use crate::graders::{GraderParams, GraderSpec, KeywordParams};

fn default_true() -> bool {
    true
}

/// A fixture file reference: either loaded from the fixture directory or
/// given inline through `content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FixtureRef {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FixtureRef {
    /// Whether the bytes come from the fixture directory rather than inline.
    pub fn is_on_disk(&self) -> bool {
        self.content.is_none()
    }
}

/// Stimulus handed to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskInputs {
    #[serde(default)]
    pub prompt: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FixtureRef>,
}

/// Expected-output hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Expectation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_contains: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_trigger: Option<bool>,
}

/// One evaluation unit. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    /// Stable identifier, used for baseline pairing and cache keys.
    pub id: String,

    /// Display name; falls back to `id` when empty.
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-task override of the spec timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Per-task fixture directory, overriding the spec's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_root: Option<String>,

    #[serde(default)]
    pub inputs: TaskInputs,

    #[serde(default)]
    pub expected: Expectation,

    /// Task-specific validators, run after the global ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graders: Vec<GraderSpec>,
}

impl TaskDefinition {
    /// Parse and validate a task from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut task: TaskDefinition = serde_yaml::from_str(text)?;
        if task.name.trim().is_empty() {
            task.name = task.id.clone();
        }
        task.validate()?;
        Ok(task)
    }

    /// A prompt-only task, as produced from a dataset row.
    pub fn generated(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            group: None,
            tags: Vec::new(),
            enabled: true,
            timeout_seconds: None,
            context_root: None,
            inputs: TaskInputs {
                prompt: prompt.into(),
                ..Default::default()
            },
            expected: Expectation::default(),
            graders: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SkillGaugeError::invalid_task(
                &self.name,
                "missing required 'id'",
            ));
        }
        if self.timeout_seconds == Some(0) {
            return Err(SkillGaugeError::invalid_task(
                &self.id,
                "timeout_seconds must be at least 1",
            ));
        }
        for file in &self.inputs.files {
            if file.path.trim().is_empty() {
                return Err(SkillGaugeError::invalid_task(
                    &self.id,
                    "fixture entry has an empty path",
                ));
            }
        }
        for grader in &self.graders {
            grader.validate()?;
        }
        Ok(())
    }

    /// Validators declared on the task itself, including the implicit
    /// `output_contains` keyword check.
    pub fn effective_graders(&self) -> Vec<GraderSpec> {
        let mut graders = self.graders.clone();
        if !self.expected.output_contains.is_empty() {
            graders.push(GraderSpec {
                name: "output_contains".to_string(),
                weight: None,
                params: GraderParams::Keyword(KeywordParams {
                    must_contain: self.expected.output_contains.clone(),
                    must_not_contain: Vec::new(),
                }),
            });
        }
        graders
    }

    /// Relative paths of fixtures read from disk, sorted.
    pub fn fixture_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .inputs
            .files
            .iter()
            .filter(|f| f.is_on_disk())
            .map(|f| f.path.as_str())
            .collect();
        paths.sort_unstable();
        paths
    }
}
