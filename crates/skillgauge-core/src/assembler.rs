//! Run orchestration and result assembly.
//!
//! [`Engine`] drives one evaluation end to end: run-level hooks, the task
//! pass through [`WorkerScheduler`], the optional trigger suite, the
//! optional skills-stripped baseline pass, digest and metric resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::cache::{CacheStore, FsCacheStore};
use crate::cancel::CancelSignal;
use crate::domain::{
    BenchmarkSpec, EvaluationOutcome, MetricResult, OutcomeConfig, OutcomeDigest, Result,
    SkillGaugeError, TriggerMetrics,
};
use crate::executor::AgentExecutor;
use crate::hooks::{HookPoint, HookRunner};
use crate::obs;
use crate::plan::RunPlan;
use crate::scheduler::WorkerScheduler;
use crate::statistics::{self, DigestParams};
use crate::trial::TrialExecutor;
use crate::triggers::run_trigger_suite;

/// Success rate across tasks.
pub const METRIC_TASK_COMPLETION: &str = "task_completion";
/// Mean weighted composite score across tasks.
pub const METRIC_AVERAGE_SCORE: &str = "average_score";
/// Confidence-weighted trigger accuracy.
pub const METRIC_TRIGGER_ACCURACY: &str = "trigger_accuracy";

/// External controls for a run: cancellation and progress.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub cancel: CancelSignal,
    /// Incremented once per finished task, across both passes of a
    /// baseline run.
    pub progress: Arc<AtomicUsize>,
}

/// Evaluation engine bound to one agent executor.
#[derive(Clone)]
pub struct Engine {
    executor: Arc<dyn AgentExecutor>,
}

impl Engine {
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<dyn AgentExecutor> {
        &self.executor
    }

    /// Run `plan` to completion.
    pub async fn run(&self, plan: &RunPlan) -> Result<EvaluationOutcome> {
        self.run_controlled(plan, RunControl::default()).await
    }

    /// Run `plan` with an external cancel signal and progress counter.
    ///
    /// Returns `Err` only for pre-run failures (a fatal `before_run` hook)
    /// and baseline pairing errors. Task failures live in the outcome.
    pub async fn run_controlled(
        &self,
        plan: &RunPlan,
        control: RunControl,
    ) -> Result<EvaluationOutcome> {
        let eval_id = format!("eval-{}", Uuid::new_v4());
        let span = obs::run_span(&eval_id, &plan.spec.name);
        self.run_inner(plan, control, eval_id).instrument(span).await
    }

    async fn run_inner(
        &self,
        plan: &RunPlan,
        control: RunControl,
        eval_id: String,
    ) -> Result<EvaluationOutcome> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let hooks = HookRunner::new(plan.spec.hooks.clone(), plan.spec_dir.clone());
        hooks.run(HookPoint::BeforeRun).await?;

        let total_tasks = plan.tasks.len() * if plan.baseline { 2 } else { 1 };
        obs::emit_run_started(&eval_id, &plan.spec.skill, total_tasks, plan.workers());

        let mut outcome = self.evaluate(plan, &control, &eval_id, timestamp).await;
        if plan.baseline && !outcome.canceled {
            let baseline_plan = plan.without_skills();
            let baseline = self
                .evaluate(&baseline_plan, &control, &eval_id, timestamp)
                .await;
            if baseline.canceled {
                outcome.canceled = true;
            } else {
                attach_baseline(&mut outcome, baseline)?;
            }
        }

        if let Err(e) = hooks.run(HookPoint::AfterRun).await {
            warn!(error = %e, "after_run hook failed; continuing");
        }

        outcome.digest.duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_run_finished(
            &eval_id,
            outcome.digest.duration_ms,
            outcome.digest.succeeded,
            outcome.digest.failed,
            outcome.digest.errors,
            outcome.canceled,
        );
        Ok(outcome)
    }

    /// One pass over the plan's tasks, plus the trigger suite when skills
    /// are enabled.
    async fn evaluate(
        &self,
        plan: &RunPlan,
        control: &RunControl,
        eval_id: &str,
        timestamp: DateTime<Utc>,
    ) -> EvaluationOutcome {
        let started = Instant::now();
        let spec = &plan.spec;
        let trials = TrialExecutor::new(Arc::clone(&self.executor), plan, control.cancel.clone());
        let cache = plan
            .cache_dir
            .as_ref()
            .map(|dir| Arc::new(FsCacheStore::new(dir)) as Arc<dyn CacheStore>);

        let report = WorkerScheduler::new(plan.clone(), trials.clone(), cache)
            .with_progress(Arc::clone(&control.progress))
            .run()
            .await;

        let trigger_metrics = match &plan.trigger {
            Some(suite) if plan.skills_enabled && !report.canceled => {
                let results = run_trigger_suite(&trials, suite, plan.workers()).await;
                TriggerMetrics::compute(&results)
            }
            _ => None,
        };

        let digest = statistics::digest(
            &report.outcomes,
            DigestParams {
                skipped: report.skipped,
                duration_ms: started.elapsed().as_millis() as u64,
                trials_per_task: spec.config.trials_per_task,
                threshold: spec.significance_threshold(),
            },
        );
        let metrics = resolve_metrics(spec, &digest, trigger_metrics.as_ref());

        EvaluationOutcome {
            eval_id: eval_id.to_string(),
            skill: spec.skill.clone(),
            eval_name: spec.name.clone(),
            timestamp,
            config: OutcomeConfig {
                trials_per_task: spec.config.trials_per_task,
                model: spec.config.model.clone(),
                executor: self.executor.name().to_string(),
                timeout_seconds: spec.config.timeout_seconds,
                max_attempts: spec.config.effective_attempts(),
                parallel: spec.config.parallel,
                workers: plan.workers(),
                cache_enabled: plan.cache_enabled(),
            },
            digest,
            metrics,
            tasks: report.outcomes,
            trigger_metrics,
            is_baseline: false,
            baseline_outcome: None,
            canceled: report.canceled,
        }
    }
}

/// Resolve each enabled metric definition against the digest.
///
/// A metric passes when its threshold is non-positive or the value meets it.
pub fn resolve_metrics(
    spec: &BenchmarkSpec,
    digest: &OutcomeDigest,
    trigger: Option<&TriggerMetrics>,
) -> BTreeMap<String, MetricResult> {
    let mut resolved = BTreeMap::new();
    for metric in spec.metrics.iter().filter(|m| m.enabled) {
        let value = match metric.name.as_str() {
            METRIC_TASK_COMPLETION => Some(digest.success_rate),
            METRIC_AVERAGE_SCORE => Some(digest.weighted_score),
            METRIC_TRIGGER_ACCURACY => trigger.map(|t| t.accuracy),
            _ => None,
        };
        let Some(value) = value else {
            debug!(metric = %metric.name, "no value for metric; skipped");
            continue;
        };
        resolved.insert(
            metric.name.clone(),
            MetricResult {
                identifier: metric.name.clone(),
                value,
                threshold: metric.threshold,
                passed: metric.threshold <= 0.0 || value >= metric.threshold,
                weight: metric.weight,
            },
        );
    }
    resolved
}

/// Pair the baseline pass with the with-skill pass by task id.
///
/// The two passes must cover the same tasks unless either one stopped
/// early through fail-fast.
fn attach_baseline(outcome: &mut EvaluationOutcome, baseline: EvaluationOutcome) -> Result<()> {
    let with_ids: BTreeSet<&str> = outcome.tasks.iter().map(|t| t.test_id.as_str()).collect();
    let base_ids: BTreeSet<&str> = baseline.tasks.iter().map(|t| t.test_id.as_str()).collect();
    let complete = outcome.digest.skipped == 0 && baseline.digest.skipped == 0;
    if complete && with_ids != base_ids {
        let missing: Vec<&str> = with_ids.symmetric_difference(&base_ids).copied().collect();
        return Err(SkillGaugeError::BaselineMismatch(format!(
            "task sets differ: {}",
            missing.join(", ")
        )));
    }

    for task in &mut outcome.tasks {
        if let Some(base) = baseline.tasks.iter().find(|b| b.test_id == task.test_id) {
            task.skill_impact = Some(statistics::skill_impact(task, base));
        }
    }
    if let Some(summary) = &mut outcome.digest.statistics {
        summary.normalized_gain = Some(statistics::normalized_gain(
            baseline.digest.success_rate,
            outcome.digest.success_rate,
        ));
    }
    outcome.is_baseline = true;
    outcome.baseline_outcome = Some(Box::new(baseline));
    Ok(())
}
