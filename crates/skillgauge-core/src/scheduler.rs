//! Task scheduling across a bounded worker pool.
//!
//! Whole tasks are the unit of work: every trial of a task, and every retry
//! of those trials, runs on the worker that picked the task up. Outcomes land
//! in a slot indexed by the task's position in the plan, so the report is in
//! declaration order no matter which worker finishes first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::{info, instrument, warn, Instrument};

use crate::cache::{CacheStore, Fingerprint};
use crate::domain::{Status, TaskDefinition, TestOutcome};
use crate::graders::GraderPipeline;
use crate::hooks::{HookPoint, HookRunner};
use crate::obs;
use crate::plan::RunPlan;
use crate::statistics;
use crate::trial::TrialExecutor;
use crate::workspace::fixture_root;

/// What the scheduler hands back to the assembler.
#[derive(Debug, Clone)]
pub struct SchedulerReport {
    /// Outcomes of dispatched tasks, in plan order.
    pub outcomes: Vec<TestOutcome>,
    /// Tasks never dispatched because of fail-fast or cancellation.
    pub skipped: usize,
    pub canceled: bool,
}

/// Per-task work shared by all workers.
#[derive(Clone)]
struct TaskRunner {
    plan: RunPlan,
    trials: TrialExecutor,
    cache: Option<Arc<dyn CacheStore>>,
    hooks: HookRunner,
    completed: Arc<AtomicUsize>,
}

/// Runs every task of a plan, sequentially or on a bounded pool.
#[derive(Clone)]
pub struct WorkerScheduler {
    runner: TaskRunner,
}

impl WorkerScheduler {
    pub fn new(plan: RunPlan, trials: TrialExecutor, cache: Option<Arc<dyn CacheStore>>) -> Self {
        let hooks = HookRunner::new(plan.spec.hooks.clone(), plan.spec_dir.clone());
        Self {
            runner: TaskRunner {
                plan,
                trials,
                cache,
                hooks,
                completed: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    /// Count finished tasks into `counter`, for status polling.
    pub fn with_progress(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.runner.completed = counter;
        self
    }

    #[instrument(
        skip(self),
        fields(
            spec = %self.runner.plan.spec.name,
            tasks = self.runner.plan.tasks.len(),
            workers = self.runner.plan.workers()
        )
    )]
    pub async fn run(&self) -> SchedulerReport {
        let runner = Arc::new(self.runner.clone());
        let tasks = Arc::clone(&runner.plan.tasks);
        let workers = runner.plan.workers();

        let slots = if workers <= 1 {
            run_sequential(&runner, &tasks).await
        } else {
            run_pool(&runner, &tasks, workers).await
        };

        let canceled = runner.trials.cancel_signal().is_canceled();
        let skipped = slots.iter().filter(|s| s.is_none()).count();
        SchedulerReport {
            outcomes: slots.into_iter().flatten().collect(),
            skipped,
            canceled,
        }
    }
}

async fn run_sequential(runner: &TaskRunner, tasks: &[TaskDefinition]) -> Vec<Option<TestOutcome>> {
    let fail_fast = runner.plan.spec.config.fail_fast;
    let mut slots: Vec<Option<TestOutcome>> = vec![None; tasks.len()];
    for (index, task) in tasks.iter().enumerate() {
        if runner.trials.cancel_signal().is_canceled() {
            break;
        }
        let outcome = runner.run_task(task).await;
        let stop = fail_fast && outcome.status == Status::Error;
        slots[index] = Some(outcome);
        if stop {
            info!(task_id = %task.id, "fail-fast: not dispatching remaining tasks");
            break;
        }
    }
    slots
}

async fn run_pool(
    runner: &Arc<TaskRunner>,
    tasks: &Arc<Vec<TaskDefinition>>,
    workers: usize,
) -> Vec<Option<TestOutcome>> {
    let fail_fast = runner.plan.spec.config.fail_fast;
    let sem = Arc::new(Semaphore::new(workers));
    let (fail_tx, _fail_rx) = watch::channel(false);
    let fail_flag = Arc::new(fail_tx);

    let mut handles = Vec::with_capacity(tasks.len());
    for index in 0..tasks.len() {
        let runner = Arc::clone(runner);
        let tasks = Arc::clone(tasks);
        let sem = Arc::clone(&sem);
        let fail_flag = Arc::clone(&fail_flag);
        let fail_rx = fail_flag.subscribe();

        let handle = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await.ok();

                // A sibling tripped fail-fast, or the run was canceled.
                if *fail_rx.borrow() || runner.trials.cancel_signal().is_canceled() {
                    return None;
                }

                let task = &tasks[index];
                let outcome = runner.run_task(task).await;
                if fail_fast && outcome.status == Status::Error {
                    info!(task_id = %task.id, "fail-fast: not dispatching remaining tasks");
                    fail_flag.send_replace(true);
                }
                Some(outcome)
            }
            .in_current_span(),
        );
        handles.push(handle);
    }

    let mut slots = Vec::with_capacity(tasks.len());
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(slot) => slots.push(slot),
            Err(e) => {
                let task = &tasks[index];
                warn!(task_id = %task.id, error = %e, "task worker aborted");
                slots.push(Some(runner.outcome_without_runs(
                    task,
                    Status::Error,
                    format!("task worker aborted: {e}"),
                )));
            }
        }
    }
    slots
}

impl TaskRunner {
    fn group_for(&self, task: &TaskDefinition) -> Option<String> {
        self.plan.spec.group_label().or_else(|| task.group.clone())
    }

    fn outcome_without_runs(&self, task: &TaskDefinition, status: Status, msg: String) -> TestOutcome {
        TestOutcome {
            test_id: task.id.clone(),
            display_name: task.name.clone(),
            group: self.group_for(task),
            status,
            runs: Vec::new(),
            stats: None,
            skill_impact: None,
            error_msg: Some(msg),
        }
    }

    /// Hooks, cache lookup, every trial, stats, cache write.
    async fn run_task(&self, task: &TaskDefinition) -> TestOutcome {
        let spec = &self.plan.spec;
        let trials = spec.config.trials_per_task;

        if let Err(e) = self.hooks.run(HookPoint::BeforeTask).await {
            let outcome = self.outcome_without_runs(task, Status::Failed, e.to_string());
            obs::emit_task_finished(&task.id, &outcome.status, 0.0);
            self.completed.fetch_add(1, Ordering::SeqCst);
            return outcome;
        }

        let fingerprint = self.cache.as_ref().map(|_| {
            Fingerprint::compute(spec, task, &fixture_root(spec, task, &self.plan.spec_dir))
        });
        if let (Some(cache), Some(fp)) = (&self.cache, &fingerprint) {
            match cache.get(fp).await {
                Ok(Some(outcome)) => {
                    obs::emit_task_cache_hit(&task.id, fp);
                    self.after_task(task).await;
                    self.completed.fetch_add(1, Ordering::SeqCst);
                    return outcome;
                }
                Ok(None) => {}
                Err(e) => obs::emit_cache_read_failed(&task.id, &e),
            }
        }

        obs::emit_task_started(&task.id, trials);
        let pipeline = GraderPipeline::for_task(&spec.graders, task);
        let cancel = self.trials.cancel_signal();
        let mut runs = Vec::with_capacity(trials as usize);
        for run_number in 1..=trials {
            // The first trial always runs so a canceled task still reports why.
            if !runs.is_empty() && cancel.is_canceled() {
                break;
            }
            runs.push(self.trials.run(task, &pipeline, run_number).await);
        }

        let status = Status::from_runs(&runs);
        let outcome = TestOutcome {
            test_id: task.id.clone(),
            display_name: task.name.clone(),
            group: self.group_for(task),
            status,
            stats: statistics::task_stats(&runs, trials, spec.significance_threshold()),
            runs,
            skill_impact: None,
            error_msg: None,
        };
        obs::emit_task_finished(&task.id, &outcome.status, outcome.pass_rate());

        if let (Some(cache), Some(fp)) = (&self.cache, &fingerprint) {
            if !cancel.is_canceled() {
                if let Err(e) = cache.put(fp, &outcome).await {
                    obs::emit_cache_write_failed(&task.id, &e);
                }
            }
        }

        self.after_task(task).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn after_task(&self, task: &TaskDefinition) {
        if let Err(e) = self.hooks.run(HookPoint::AfterTask).await {
            warn!(task_id = %task.id, error = %e, "after_task hook failed; continuing");
        }
    }
}
