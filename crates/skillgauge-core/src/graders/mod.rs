//! Validator registry and grading pipeline.
//!
//! Validator kinds form a closed set ([`GraderKind`]). Each kind has its own
//! parameter struct that deserializes with `deny_unknown_fields` and is
//! checked by [`GraderSpec::validate`] when the spec loads, so a typo in a
//! grader block is a configuration error rather than a silent zero score.
//!
//! - [`pipeline`] — `GraderPipeline`: runs every validator for one attempt
//! - [`text`] — `keyword`, `regex`
//! - [`sequence`] — `action_sequence`, `skill_invocation` and the matcher
//! - [`session`] — `behavior`, `tool_constraint`
//! - [`files`] — `file`, `diff`
//! - [`code`] — `code` (assertions over [`expr`])
//! - [`program`] — `program`
//! - [`judge`] — `prompt` (LLM judge through the executor)
//! - [`schema`] — `json_schema`

pub mod code;
pub mod expr;
pub mod files;
pub mod judge;
pub mod pipeline;
pub mod program;
pub mod schema;
pub mod sequence;
pub mod session;
pub mod text;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Result, SessionDigest, SkillGaugeError};
use crate::executor::{AgentExecutor, ToolCall, TranscriptEvent};

pub use code::CodeParams;
pub use files::{ContentPattern, DiffParams, ExpectedFile, FileParams};
pub use judge::PromptParams;
pub use pipeline::GraderPipeline;
pub use program::ProgramParams;
pub use schema::JsonSchemaParams;
pub use sequence::{
    match_sequence, ActionMatchingMode, ActionSequenceParams, MatchMode, SequenceMatch,
    SkillInvocationParams, SkillMatchingMode,
};
pub use session::{BehaviorParams, ToolConstraintParams};
pub use text::{KeywordParams, RegexParams};

/// Failure of a validator to complete its check.
///
/// The pipeline turns this into a zero score for that validator only.
#[derive(Debug, thiserror::Error)]
pub enum GraderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("program error: {0}")]
    Program(String),

    #[error("judge error: {0}")]
    Judge(String),

    #[error("expression error: {0}")]
    Expression(#[from] expr::ExprError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("schema error: {0}")]
    Schema(String),
}

/// The closed set of validator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraderKind {
    Code,
    Prompt,
    Regex,
    Keyword,
    File,
    JsonSchema,
    Program,
    Behavior,
    ActionSequence,
    SkillInvocation,
    ToolConstraint,
    Diff,
}

impl GraderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GraderKind::Code => "code",
            GraderKind::Prompt => "prompt",
            GraderKind::Regex => "regex",
            GraderKind::Keyword => "keyword",
            GraderKind::File => "file",
            GraderKind::JsonSchema => "json_schema",
            GraderKind::Program => "program",
            GraderKind::Behavior => "behavior",
            GraderKind::ActionSequence => "action_sequence",
            GraderKind::SkillInvocation => "skill_invocation",
            GraderKind::ToolConstraint => "tool_constraint",
            GraderKind::Diff => "diff",
        }
    }

    /// Whether identical inputs always produce identical verdicts.
    ///
    /// `prompt` depends on a live judge and `behavior` on wall-clock
    /// measurements; either one disables the cache for the run.
    pub fn is_deterministic(self) -> bool {
        !matches!(self, GraderKind::Prompt | GraderKind::Behavior)
    }
}

impl fmt::Display for GraderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific parameters, tagged by `type` with the body under `config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum GraderParams {
    Code(CodeParams),
    Prompt(PromptParams),
    Regex(RegexParams),
    Keyword(KeywordParams),
    File(FileParams),
    JsonSchema(JsonSchemaParams),
    Program(ProgramParams),
    Behavior(BehaviorParams),
    ActionSequence(ActionSequenceParams),
    SkillInvocation(SkillInvocationParams),
    ToolConstraint(ToolConstraintParams),
    Diff(DiffParams),
}

impl GraderParams {
    pub fn kind(&self) -> GraderKind {
        match self {
            GraderParams::Code(_) => GraderKind::Code,
            GraderParams::Prompt(_) => GraderKind::Prompt,
            GraderParams::Regex(_) => GraderKind::Regex,
            GraderParams::Keyword(_) => GraderKind::Keyword,
            GraderParams::File(_) => GraderKind::File,
            GraderParams::JsonSchema(_) => GraderKind::JsonSchema,
            GraderParams::Program(_) => GraderKind::Program,
            GraderParams::Behavior(_) => GraderKind::Behavior,
            GraderParams::ActionSequence(_) => GraderKind::ActionSequence,
            GraderParams::SkillInvocation(_) => GraderKind::SkillInvocation,
            GraderParams::ToolConstraint(_) => GraderKind::ToolConstraint,
            GraderParams::Diff(_) => GraderKind::Diff,
        }
    }

    /// The grading capability behind these parameters.
    pub fn grader(&self) -> &dyn Grader {
        match self {
            GraderParams::Code(p) => p,
            GraderParams::Prompt(p) => p,
            GraderParams::Regex(p) => p,
            GraderParams::Keyword(p) => p,
            GraderParams::File(p) => p,
            GraderParams::JsonSchema(p) => p,
            GraderParams::Program(p) => p,
            GraderParams::Behavior(p) => p,
            GraderParams::ActionSequence(p) => p,
            GraderParams::SkillInvocation(p) => p,
            GraderParams::ToolConstraint(p) => p,
            GraderParams::Diff(p) => p,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            GraderParams::Code(p) => p.validate(),
            GraderParams::Prompt(p) => p.validate(),
            GraderParams::Regex(p) => p.validate(),
            GraderParams::Keyword(_) => Ok(()),
            GraderParams::File(p) => p.validate(),
            GraderParams::JsonSchema(p) => p.validate(),
            GraderParams::Program(p) => p.validate(),
            GraderParams::Behavior(p) => p.validate(),
            GraderParams::ActionSequence(p) => p.validate(),
            GraderParams::SkillInvocation(p) => p.validate(),
            GraderParams::ToolConstraint(p) => p.validate(),
            GraderParams::Diff(p) => p.validate(),
        }
    }
}

/// A configured validator: name, weight and typed parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawGraderSpec")]
pub struct GraderSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    #[serde(flatten)]
    pub params: GraderParams,
}

impl GraderSpec {
    pub fn kind(&self) -> GraderKind {
        self.params.kind()
    }

    /// Declared weight, with unset or non-positive values mapped to 1.0.
    pub fn effective_weight(&self) -> f64 {
        match self.weight {
            Some(w) if w > 0.0 => w,
            _ => 1.0,
        }
    }

    /// Check the kind-specific parameter constraints.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SkillGaugeError::invalid_grader(
                self.kind().as_str(),
                "name must not be empty",
            ));
        }
        self.params
            .validate()
            .map_err(|reason| SkillGaugeError::invalid_grader(&self.name, reason))
    }
}

/// Wire shape of a grader block before kind dispatch.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGraderSpec {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

impl TryFrom<RawGraderSpec> for GraderSpec {
    type Error = String;

    fn try_from(raw: RawGraderSpec) -> std::result::Result<Self, Self::Error> {
        let config = match raw.config {
            None | Some(serde_json::Value::Null) => serde_json::json!({}),
            Some(v) => v,
        };
        let tagged = serde_json::json!({ "type": raw.kind, "config": config });
        let params: GraderParams = serde_json::from_value(tagged)
            .map_err(|e| format!("grader '{}': {e}", raw.name))?;
        Ok(GraderSpec {
            name: raw.name,
            weight: raw.weight,
            params,
        })
    }
}

/// Verdict of one validator, before the pipeline attaches identity and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub score: f64,
    pub passed: bool,
    pub feedback: String,
    pub details: Option<serde_json::Value>,
}

impl Verdict {
    pub fn new(score: f64, passed: bool, feedback: impl Into<String>) -> Self {
        Self {
            score,
            passed,
            feedback: feedback.into(),
            details: None,
        }
    }

    pub fn fail(feedback: impl Into<String>) -> Self {
        Self::new(0.0, false, feedback)
    }

    /// Score a list of independent checks: `(total - failures) / total`,
    /// 1.0 when there are no checks.
    pub fn from_checks(total: usize, failures: Vec<String>, ok: &str) -> Self {
        let passed = total.saturating_sub(failures.len());
        let score = if total == 0 {
            1.0
        } else {
            passed as f64 / total as f64
        };
        let feedback = if failures.is_empty() {
            ok.to_string()
        } else {
            failures.join("; ")
        };
        Self::new(score, failures.is_empty(), feedback)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Everything a validator may inspect for one attempt.
#[derive(Clone)]
pub struct GradingContext {
    pub task_id: String,
    pub prompt: String,
    pub output: String,
    pub transcript: Vec<TranscriptEvent>,
    pub tool_calls: Vec<ToolCall>,
    pub session: SessionDigest,
    pub duration_ms: u64,
    /// The attempt's private workspace, when one was materialized.
    pub workspace_dir: Option<PathBuf>,
    /// Directory of the benchmark spec; relative grader paths resolve here.
    pub spec_dir: PathBuf,
    /// Executor used by `prompt` validators.
    pub judge: Option<Arc<dyn AgentExecutor>>,
    pub judge_model: String,
    pub timeout: Duration,
}

impl fmt::Debug for GradingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradingContext")
            .field("task_id", &self.task_id)
            .field("output_len", &self.output.len())
            .field("tool_calls", &self.tool_calls.len())
            .field("workspace_dir", &self.workspace_dir)
            .field("has_judge", &self.judge.is_some())
            .finish()
    }
}

impl GradingContext {
    /// Variable bindings for assertion expressions.
    pub fn scope(&self) -> expr::Scope {
        use expr::Value;
        let mut scope = expr::Scope::new();
        scope.insert("output", Value::Str(self.output.clone()));
        scope.insert(
            "transcript",
            Value::strings(self.transcript.iter().map(|e| e.kind.clone())),
        );
        scope.insert(
            "tool_calls",
            Value::strings(self.tool_calls.iter().map(|c| c.name.clone())),
        );
        scope.insert("skills", Value::strings(self.session.skills_invoked.clone()));
        scope.insert("errors", Value::strings(self.session.errors.clone()));
        scope.insert("duration_ms", Value::Num(self.duration_ms as f64));
        scope.insert("turns", Value::Num(self.session.total_turns as f64));
        scope.insert("tokens", Value::Num(self.session.tokens_total as f64));
        scope
    }
}

/// One validator's grading capability.
#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(&self, ctx: &GradingContext) -> std::result::Result<Verdict, GraderError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> std::result::Result<GraderSpec, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn test_tagged_params_parse() {
        let spec = parse(
            "type: regex\nname: has-number\nweight: 2\nconfig:\n  must_match: ['\\d+']\n",
        )
        .unwrap();
        assert_eq!(spec.kind(), GraderKind::Regex);
        assert_eq!(spec.effective_weight(), 2.0);
        spec.validate().unwrap();
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = parse("type: telepathy\nname: t\n").unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn test_unknown_param_field_rejected() {
        let err = parse("type: keyword\nname: k\nconfig:\n  must_contains: [x]\n").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        assert!(parse("type: keyword\nname: k\nparams: {}\n").is_err());
    }

    #[test]
    fn test_missing_required_param_rejected() {
        let err = parse("type: program\nname: p\nconfig:\n  args: [x]\n").unwrap_err();
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn test_semantic_validation_at_load() {
        let spec = parse("type: regex\nname: bad\nconfig:\n  must_match: ['(']\n").unwrap();
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, SkillGaugeError::InvalidGrader { .. }));
    }

    #[test]
    fn test_non_positive_weight_defaults() {
        let spec = parse("type: keyword\nname: k\nweight: 0\n").unwrap();
        assert_eq!(spec.effective_weight(), 1.0);
        let spec = parse("type: keyword\nname: k\nweight: -3\n").unwrap();
        assert_eq!(spec.effective_weight(), 1.0);
    }

    #[test]
    fn test_serialized_shape_roundtrips() {
        let spec = parse("type: keyword\nname: k\nconfig:\n  must_contain: [done]\n").unwrap();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "keyword");
        assert_eq!(json["config"]["must_contain"][0], "done");
        let back: GraderSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_determinism_flags() {
        assert!(!GraderKind::Prompt.is_deterministic());
        assert!(!GraderKind::Behavior.is_deterministic());
        assert!(GraderKind::Diff.is_deterministic());
        assert!(GraderKind::Code.is_deterministic());
    }

    #[test]
    fn test_verdict_from_checks() {
        let v = Verdict::from_checks(4, vec!["missing x".into()], "ok");
        assert_eq!(v.score, 0.75);
        assert!(!v.passed);
        assert_eq!(v.feedback, "missing x");
        let v = Verdict::from_checks(0, vec![], "nothing to check");
        assert_eq!(v.score, 1.0);
        assert!(v.passed);
    }
}
