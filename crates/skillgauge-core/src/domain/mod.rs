//! Domain types for benchmark evaluation.
//!
//! - [`spec`] — `BenchmarkSpec`, `RunConfig`, `MetricDef`
//! - [`task`] — `TaskDefinition` and its fixture references
//! - [`outcome`] — run, task and evaluation outcome documents
//! - [`trigger`] — trigger suites and confidence-weighted metrics
//! - [`error`] — `SkillGaugeError` and the configuration `Result`

pub mod error;
pub mod outcome;
pub mod spec;
pub mod task;
pub mod trigger;

pub use error::{Result, SkillGaugeError};
pub use outcome::{
    composite_score, EvaluationOutcome, ExitStatus, GraderResult, GroupStats,
    MetricResult, OutcomeConfig, OutcomeDigest, RunResult, SessionDigest, SkillImpact,
    StatisticalSummary, Status, TestOutcome, TestStats,
};
pub use spec::{BenchmarkSpec, MetricDef, RunConfig};
pub use task::{Expectation, FixtureRef, TaskDefinition, TaskInputs};
pub use trigger::{Confidence, TriggerMetrics, TriggerPrompt, TriggerResult, TriggerSpec};
