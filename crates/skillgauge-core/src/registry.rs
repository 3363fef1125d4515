//! Owned registry of in-flight and finished runs.
//!
//! Control surfaces (CLI, a line-protocol server, tests) create their own
//! [`RunRegistry`] and keep it for as long as they need status lookups.
//! Every mutation goes through one mutex. A run's cancel handle is dropped
//! as soon as the run ends; its terminal [`RunState`] stays so later polls
//! still resolve, until [`RunRegistry::forget`] drops it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::assembler::{Engine, RunControl};
use crate::cancel::{cancel_pair, CancelHandle};
use crate::domain::{EvaluationOutcome, Result, SkillGaugeError};
use crate::executor::AgentExecutor;
use crate::plan::RunPlan;

/// Lifecycle of a registered run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

/// Pollable snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: String,
    pub status: RunStatus,
    pub completed_tasks: usize,
    pub total_tasks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Entry {
    state: RunState,
    /// Present only while the run is live.
    cancel: Option<CancelHandle>,
    progress: Arc<AtomicUsize>,
    done: watch::Receiver<bool>,
    result: Option<Result<EvaluationOutcome>>,
}

/// Registry of runs started through it.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, Entry>>>,
}

fn unknown_run(id: &str) -> SkillGaugeError {
    SkillGaugeError::Config(format!("unknown run {id}"))
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `plan` on `executor` and return its id immediately.
    pub async fn start(&self, plan: RunPlan, executor: Arc<dyn AgentExecutor>) -> String {
        let id = format!("run-{}", Uuid::new_v4());
        let (cancel, signal) = cancel_pair();
        let progress = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = watch::channel(false);
        let total_tasks = plan.tasks.len() * if plan.baseline { 2 } else { 1 };

        self.runs.lock().await.insert(
            id.clone(),
            Entry {
                state: RunState {
                    id: id.clone(),
                    status: RunStatus::Running,
                    completed_tasks: 0,
                    total_tasks,
                    error: None,
                },
                cancel: Some(cancel),
                progress: Arc::clone(&progress),
                done: done_rx,
                result: None,
            },
        );

        let runs = Arc::clone(&self.runs);
        let run_id = id.clone();
        tokio::spawn(async move {
            let control = RunControl {
                cancel: signal,
                progress: Arc::clone(&progress),
            };
            let result = Engine::new(executor).run_controlled(&plan, control).await;

            let mut runs = runs.lock().await;
            if let Some(entry) = runs.get_mut(&run_id) {
                entry.state.status = match &result {
                    Ok(outcome) if outcome.canceled => RunStatus::Canceled,
                    Ok(_) => RunStatus::Completed,
                    Err(_) => RunStatus::Failed,
                };
                entry.state.completed_tasks = progress.load(Ordering::SeqCst);
                entry.state.error = result.as_ref().err().map(|e| e.to_string());
                entry.cancel = None;
                entry.result = Some(result);
                info!(run_id = %run_id, status = ?entry.state.status, "run finished");
            }
            drop(runs);
            done_tx.send_replace(true);
        });

        id
    }

    /// Current state of run `id`, or `None` if it was never started here.
    pub async fn status(&self, id: &str) -> Option<RunState> {
        let runs = self.runs.lock().await;
        let entry = runs.get(id)?;
        let mut state = entry.state.clone();
        if state.status == RunStatus::Running {
            state.completed_tasks = entry.progress.load(Ordering::SeqCst);
        }
        Some(state)
    }

    /// Signal cancellation. False when the run is unknown or already over.
    pub async fn cancel(&self, id: &str) -> bool {
        let runs = self.runs.lock().await;
        match runs.get(id).and_then(|e| e.cancel.as_ref()) {
            Some(handle) => {
                handle.cancel();
                info!(run_id = %id, "cancel requested");
                true
            }
            None => false,
        }
    }

    /// Wait for run `id` to finish and take its outcome.
    ///
    /// The outcome can be taken once; the terminal state remains pollable.
    pub async fn wait(&self, id: &str) -> Result<EvaluationOutcome> {
        let mut done = {
            let runs = self.runs.lock().await;
            runs.get(id).map(|e| e.done.clone()).ok_or_else(|| unknown_run(id))?
        };
        // Err means the run task went away without reporting.
        let finished = done.wait_for(|d| *d).await.is_ok();

        let mut runs = self.runs.lock().await;
        let entry = runs.get_mut(id).ok_or_else(|| unknown_run(id))?;
        match entry.result.take() {
            Some(result) => result,
            None if !finished => {
                entry.state.status = RunStatus::Failed;
                entry.state.error = Some("run task aborted".to_string());
                entry.cancel = None;
                Err(SkillGaugeError::Config(format!("run {id} aborted")))
            }
            None => Err(SkillGaugeError::Config(format!(
                "outcome of run {id} was already taken"
            ))),
        }
    }

    /// Drop a finished run and any outcome not yet taken.
    ///
    /// Returns false for unknown ids and for runs still in progress.
    pub async fn forget(&self, id: &str) -> bool {
        let mut runs = self.runs.lock().await;
        match runs.get(id) {
            Some(entry) if entry.state.status != RunStatus::Running => {
                runs.remove(id);
                info!(run_id = %id, "run forgotten");
                true
            }
            _ => false,
        }
    }

    /// Number of runs currently held, live or finished.
    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}
