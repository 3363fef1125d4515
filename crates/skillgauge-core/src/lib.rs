//! SkillGauge Core Library
//!
//! Loads benchmark specs, runs agent tasks through an executor, grades
//! every attempt and summarizes the results.
//!
//! - [`loader`] / [`plan`] — spec discovery and the immutable run plan
//! - [`scheduler`] / [`trial`] — worker pool, retries, timeouts, cancellation
//! - [`graders`] — validator registry and grading pipeline
//! - [`cache`] — content-addressed outcome cache
//! - [`statistics`] — per-task stats, digests, bootstrap intervals
//! - [`assembler`] — the `Engine` that ties one run together
//! - [`registry`] — owned registry of background runs

pub mod assembler;
pub mod cache;
pub mod cancel;
pub mod domain;
pub mod executor;
pub mod filter;
pub mod graders;
pub mod hooks;
pub mod loader;
pub mod obs;
pub mod plan;
pub mod registry;
pub mod reporting;
pub mod scheduler;
pub mod statistics;
pub mod telemetry;
pub mod trial;
pub mod triggers;
pub mod workspace;

pub use assembler::{resolve_metrics, Engine, RunControl};
pub use cache::{CacheError, CacheStore, Fingerprint, FsCacheStore};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use domain::{
    BenchmarkSpec, EvaluationOutcome, ExitStatus, GraderResult, MetricDef, OutcomeDigest,
    Result, RunConfig, RunResult, SkillGaugeError, Status, TaskDefinition, TestOutcome,
    TriggerMetrics, TriggerSpec,
};
pub use executor::{
    AgentExecutor, ExecutionRequest, ExecutionResponse, ExecutorError, MockExecutor, MockReply,
};
pub use filter::TaskFilter;
pub use graders::{GraderKind, GraderPipeline, GraderSpec};
pub use hooks::{HookPoint, HookRunner, HooksConfig};
pub use loader::{load_spec, LoadedSpec};
pub use plan::{RunOptions, RunPlan, DEFAULT_CACHE_DIR};
pub use registry::{RunRegistry, RunState, RunStatus};
pub use reporting::{render_summary, write_outcome_json};
pub use scheduler::{SchedulerReport, WorkerScheduler};
pub use statistics::{bootstrap_ci, normalized_gain, ConfidenceInterval};
pub use telemetry::init_tracing;
pub use trial::TrialExecutor;

/// SkillGauge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
