//! `program` validator: an external command judges the output.
//!
//! The final output is piped on stdin and the workspace path is exported
//! as `SKILLGAUGE_WORKSPACE_DIR`. Exit status 0 scores 1.0; any other exit
//! scores 0.0 with stderr in the feedback.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Grader, GraderError, GradingContext, Verdict};

/// Environment variable holding the attempt's workspace path.
pub const WORKSPACE_ENV: &str = "SKILLGAUGE_WORKSPACE_DIR";

const DEFAULT_PROGRAM_TIMEOUT_SECS: u64 = 30;

fn default_timeout() -> u64 {
    DEFAULT_PROGRAM_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProgramParams {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Seconds; zero falls back to the default.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ProgramParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("must have a 'command'".into());
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        match self.timeout {
            0 => Duration::from_secs(DEFAULT_PROGRAM_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }
}

#[async_trait]
impl Grader for ProgramParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let workspace = ctx
            .workspace_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env(WORKSPACE_ENV, &workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GraderError::Program(format!("failed to start {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = ctx.output.clone().into_bytes();
            // Programs that never read stdin close the pipe early.
            tokio::spawn(async move {
                let _ = stdin.write_all(&input).await;
            });
        }

        let output = tokio::time::timeout(self.timeout(), child.wait_with_output())
            .await
            .map_err(|_| {
                GraderError::Program(format!(
                    "{} timed out after {}s",
                    self.command,
                    self.timeout().as_secs()
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let details = json!({
            "command": self.command,
            "args": self.args,
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
            "workspace_dir": workspace,
        });

        if output.status.success() {
            let feedback = if stdout.is_empty() {
                "Program exited successfully".to_string()
            } else {
                stdout
            };
            return Ok(Verdict::new(1.0, true, feedback).with_details(details));
        }

        let mut feedback = format!("Program exited with error: {}", output.status);
        if !stderr.is_empty() {
            feedback.push_str("; stderr: ");
            feedback.push_str(&stderr);
        }
        Ok(Verdict::fail(feedback).with_details(details))
    }
}
