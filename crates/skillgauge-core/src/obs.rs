//! Structured lifecycle events for evaluation runs.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`]
//! - Emission functions for run, task, trial, hook and cache events
//!
//! Events are emitted at `info!` level, failures at `warn!`. Filtering
//! follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn, Span};

/// Run-scoped span; every event inside carries `run_id` and `spec`.
///
/// # Example
///
/// ```ignore
/// engine_run(plan).instrument(run_span("eval-1234", "code-review")).await
/// ```
pub fn run_span(run_id: &str, spec_name: &str) -> Span {
    tracing::info_span!("skillgauge.run", run_id = %run_id, spec = %spec_name)
}

pub fn emit_run_started(run_id: &str, skill: &str, total_tasks: usize, workers: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        skill = %skill,
        total_tasks = total_tasks,
        workers = workers,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    succeeded: usize,
    failed: usize,
    errors: usize,
    canceled: bool,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        succeeded = succeeded,
        failed = failed,
        errors = errors,
        canceled = canceled,
    );
}

pub fn emit_task_started(task_id: &str, trials: u32) {
    info!(event = "task.started", task_id = %task_id, trials = trials);
}

pub fn emit_task_finished(task_id: &str, status: &dyn std::fmt::Display, pass_rate: f64) {
    info!(
        event = "task.finished",
        task_id = %task_id,
        status = %status,
        pass_rate = pass_rate,
    );
}

pub fn emit_task_cache_hit(task_id: &str, fingerprint: &dyn std::fmt::Display) {
    info!(event = "task.cache_hit", task_id = %task_id, fingerprint = %fingerprint);
}

/// Emit event: grading failed and the whole attempt runs again.
pub fn emit_trial_retry(task_id: &str, run_number: u32, attempt: u32, max_attempts: u32) {
    info!(
        event = "trial.retry",
        task_id = %task_id,
        run_number = run_number,
        attempt = attempt,
        max_attempts = max_attempts,
    );
}

pub fn emit_trial_timeout(task_id: &str, run_number: u32, seconds: u64) {
    warn!(
        event = "trial.timeout",
        task_id = %task_id,
        run_number = run_number,
        timeout_seconds = seconds,
    );
}

/// Emit event: a lifecycle hook failed; `fatal` when it aborts its scope.
pub fn emit_hook_failed(point: &str, index: usize, error: &dyn std::fmt::Display, fatal: bool) {
    warn!(
        event = "hook.failed",
        point = %point,
        index = index,
        error = %error,
        fatal = fatal,
    );
}

pub fn emit_cache_read_failed(task_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cache.read_failed", task_id = %task_id, error = %error);
}

pub fn emit_cache_write_failed(task_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cache.write_failed", task_id = %task_id, error = %error);
}
