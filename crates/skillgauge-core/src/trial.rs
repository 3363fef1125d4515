//! One (task, trial) unit: workspace, execution under a deadline, grading,
//! and retry on grading failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cancel::CancelSignal;
use crate::domain::{BenchmarkSpec, RunResult, SessionDigest, Status, TaskDefinition};
use crate::executor::{AgentExecutor, ExecutionRequest, ExecutionResponse, ExecutorError};
use crate::graders::{GraderPipeline, GradingContext};
use crate::obs;
use crate::plan::RunPlan;
use crate::workspace::{fixture_root, TrialWorkspace};

/// Runs trials of a task against the agent executor.
///
/// Cheap to clone; every worker holds its own copy.
#[derive(Clone)]
pub struct TrialExecutor {
    executor: Arc<dyn AgentExecutor>,
    spec: Arc<BenchmarkSpec>,
    spec_dir: PathBuf,
    /// Skill under test; `None` on a baseline pass.
    skill: Option<String>,
    skill_paths: Vec<PathBuf>,
    cancel: CancelSignal,
}

impl TrialExecutor {
    pub fn new(executor: Arc<dyn AgentExecutor>, plan: &RunPlan, cancel: CancelSignal) -> Self {
        let spec = Arc::clone(&plan.spec);
        let skill = (plan.skills_enabled && !spec.skill.is_empty()).then(|| spec.skill.clone());
        let skill_paths = spec
            .config
            .skill_directories
            .iter()
            .map(|d| plan.spec_dir.join(d))
            .collect();
        Self {
            executor,
            spec,
            spec_dir: plan.spec_dir.clone(),
            skill,
            skill_paths,
            cancel,
        }
    }

    pub fn executor(&self) -> &Arc<dyn AgentExecutor> {
        &self.executor
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    fn timeout_for(&self, task: &TaskDefinition) -> u64 {
        task.timeout_seconds
            .unwrap_or(self.spec.config.timeout_seconds)
    }

    /// Run trial `run_number` of `task`, re-running the whole attempt while
    /// grading fails and attempts remain.
    ///
    /// Executor errors and timeouts are final; only a `Failed` grade retries.
    pub async fn run(
        &self,
        task: &TaskDefinition,
        pipeline: &GraderPipeline,
        run_number: u32,
    ) -> RunResult {
        let max_attempts = self.spec.config.effective_attempts();
        let started = Instant::now();

        let mut attempt = 1;
        let mut result = self.attempt(task, pipeline, run_number).await;
        while result.status == Status::Failed
            && attempt < max_attempts
            && !self.cancel.is_canceled()
        {
            attempt += 1;
            obs::emit_trial_retry(&task.id, run_number, attempt, max_attempts);
            result = self.attempt(task, pipeline, run_number).await;
        }

        result.attempts = attempt;
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }

    async fn attempt(
        &self,
        task: &TaskDefinition,
        pipeline: &GraderPipeline,
        run_number: u32,
    ) -> RunResult {
        let started = Instant::now();
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        let root = fixture_root(&self.spec, task, &self.spec_dir);
        let workspace = match TrialWorkspace::materialize(&root, &task.inputs.files) {
            Ok(ws) => ws,
            Err(e) => {
                return RunResult::error(
                    run_number,
                    1,
                    elapsed(started),
                    format!("workspace setup failed: {e}"),
                )
            }
        };

        let seconds = self.timeout_for(task);
        let timeout = Duration::from_secs(seconds);
        let request = ExecutionRequest {
            task_id: task.id.clone(),
            prompt: task.inputs.prompt.clone(),
            context: task.inputs.context.clone(),
            workspace_dir: workspace.path().to_path_buf(),
            skill: self.skill.clone(),
            skill_paths: self.skill_paths.clone(),
            model: self.spec.config.model.clone(),
            timeout,
        };

        let response = match self.execute(request, seconds).await {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, ExecutorError::Timeout { .. }) {
                    obs::emit_trial_timeout(&task.id, run_number, seconds);
                }
                return RunResult::error(run_number, 1, elapsed(started), e.to_string());
            }
        };

        let session = SessionDigest::from_response(&response);
        let ctx = GradingContext {
            task_id: task.id.clone(),
            prompt: task.inputs.prompt.clone(),
            output: response.final_output.clone(),
            transcript: response.transcript.clone(),
            tool_calls: response.tool_calls.clone(),
            session: session.clone(),
            duration_ms: elapsed(started),
            workspace_dir: Some(workspace.path().to_path_buf()),
            spec_dir: self.spec_dir.clone(),
            judge: Some(Arc::clone(&self.executor)),
            judge_model: self.spec.config.model.clone(),
            timeout,
        };
        let validations = pipeline.run(&ctx).await;
        drop(workspace);

        let exec_error = match (&response.error, response.success) {
            (Some(msg), _) => Some(msg.clone()),
            (None, false) => Some("executor reported an unsuccessful run".to_string()),
            (None, true) => None,
        };
        let status = if exec_error.is_some() {
            Status::Error
        } else if validations.values().all(|v| v.passed) {
            Status::Passed
        } else {
            Status::Failed
        };
        debug!(
            task_id = %task.id,
            run_number,
            status = %status,
            validators = validations.len(),
            "attempt graded"
        );

        RunResult {
            run_number,
            attempts: 1,
            status,
            duration_ms: elapsed(started),
            validations,
            session_digest: session,
            transcript: response.transcript,
            final_output: response.final_output,
            error_msg: exec_error,
        }
    }

    /// Call the executor under the deadline, racing the cancel signal.
    async fn execute(
        &self,
        request: ExecutionRequest,
        seconds: u64,
    ) -> Result<ExecutionResponse, ExecutorError> {
        let call = tokio::time::timeout(Duration::from_secs(seconds), self.executor.execute(request));
        tokio::select! {
            res = call => res.unwrap_or(Err(ExecutorError::Timeout { seconds })),
            _ = self.cancel.canceled() => Err(ExecutorError::Canceled),
        }
    }

    /// Send one trigger prompt with the skill enabled and report whether the
    /// agent invoked it.
    pub async fn classify(
        &self,
        id: &str,
        prompt: &str,
        skill: &str,
    ) -> Result<bool, ExecutorError> {
        let workspace = TrialWorkspace::materialize(&self.spec_dir, &[])
            .map_err(|e| ExecutorError::Failed(format!("workspace setup failed: {e}")))?;
        let seconds = self.spec.config.timeout_seconds;
        let request = ExecutionRequest {
            task_id: id.to_string(),
            prompt: prompt.to_string(),
            context: Default::default(),
            workspace_dir: workspace.path().to_path_buf(),
            skill: Some(skill.to_string()),
            skill_paths: self.skill_paths.clone(),
            model: self.spec.config.model.clone(),
            timeout: Duration::from_secs(seconds),
        };
        let response = self.execute(request, seconds).await?;
        if let Some(err) = response.error {
            return Err(ExecutorError::Failed(err));
        }
        Ok(response.skill_invocations.iter().any(|s| s == skill))
    }
}
