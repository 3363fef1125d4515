//! Lifecycle hook commands around runs and tasks.
//!
//! Hooks are plain commands, split on whitespace and run in declaration
//! order. A hook whose exit code is not in its `exit_codes` list (or that
//! cannot be started) fails; the failure aborts its scope only when the
//! hook sets `error_on_fail`, and is logged as a warning otherwise.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::domain::{Result, SkillGaugeError};
use crate::obs;

fn default_exit_codes() -> Vec<i32> {
    vec![0]
}

/// One hook command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HookCommand {
    pub command: String,

    /// Working directory, relative to the spec file when not absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    #[serde(default = "default_exit_codes")]
    pub exit_codes: Vec<i32>,

    #[serde(default)]
    pub error_on_fail: bool,
}

impl HookCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_directory: None,
            exit_codes: default_exit_codes(),
            error_on_fail: false,
        }
    }

    fn accepts(&self, code: i32) -> bool {
        if self.exit_codes.is_empty() {
            code == 0
        } else {
            self.exit_codes.contains(&code)
        }
    }
}

/// Hooks for every lifecycle point.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HooksConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_run: Vec<HookCommand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_run: Vec<HookCommand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_task: Vec<HookCommand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_task: Vec<HookCommand>,
}

impl HooksConfig {
    pub fn validate(&self) -> Result<()> {
        for (point, hooks) in [
            (HookPoint::BeforeRun, &self.before_run),
            (HookPoint::AfterRun, &self.after_run),
            (HookPoint::BeforeTask, &self.before_task),
            (HookPoint::AfterTask, &self.after_task),
        ] {
            for (i, hook) in hooks.iter().enumerate() {
                if hook.command.trim().is_empty() {
                    return Err(SkillGaugeError::Config(format!(
                        "hook {point}[{i}]: empty command"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn for_point(&self, point: HookPoint) -> &[HookCommand] {
        match point {
            HookPoint::BeforeRun => &self.before_run,
            HookPoint::AfterRun => &self.after_run,
            HookPoint::BeforeTask => &self.before_task,
            HookPoint::AfterTask => &self.after_task,
        }
    }
}

/// Lifecycle point a hook list is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeRun,
    AfterRun,
    BeforeTask,
    AfterTask,
}

impl HookPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPoint::BeforeRun => "before_run",
            HookPoint::AfterRun => "after_run",
            HookPoint::BeforeTask => "before_task",
            HookPoint::AfterTask => "after_task",
        }
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs hook lists relative to a base directory.
#[derive(Debug, Clone)]
pub struct HookRunner {
    hooks: HooksConfig,
    base_dir: PathBuf,
}

impl HookRunner {
    pub fn new(hooks: HooksConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            hooks,
            base_dir: base_dir.into(),
        }
    }

    /// Run every hook at `point`. Returns the first fatal failure.
    pub async fn run(&self, point: HookPoint) -> Result<()> {
        for (index, hook) in self.hooks.for_point(point).iter().enumerate() {
            if let Err(reason) = run_hook(hook, &self.base_dir).await {
                obs::emit_hook_failed(point.as_str(), index, &reason, hook.error_on_fail);
                if hook.error_on_fail {
                    return Err(SkillGaugeError::Hook(format!("{point}[{index}]: {reason}")));
                }
            }
        }
        Ok(())
    }
}

async fn run_hook(hook: &HookCommand, base_dir: &Path) -> std::result::Result<(), String> {
    let mut parts = hook.command.split_whitespace();
    let program = parts.next().ok_or_else(|| "empty command".to_string())?;

    let mut cmd = Command::new(program);
    cmd.args(parts).kill_on_drop(true);
    if let Some(dir) = &hook.working_directory {
        cmd.current_dir(base_dir.join(dir));
    } else {
        cmd.current_dir(base_dir);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| format!("failed to start {program}: {e}"))?;
    // Killed by a signal: no exit code, never acceptable.
    let code = output.status.code().unwrap_or(-1);
    if hook.accepts(code) {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        Err(format!("command exited with code {code}"))
    } else {
        Err(format!("command exited with code {code}: {stderr}"))
    }
}
