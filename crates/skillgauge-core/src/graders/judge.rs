//! `prompt` validator: an LLM judge reached through the agent executor.
//!
//! The judge receives the rubric, the task prompt and the agent's final
//! output, and must answer with `PASS` or `FAIL`. An optional `SCORE:` line
//! carries a fractional score; without one the verdict maps to 1.0 or 0.0.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Grader, GraderError, GradingContext, Verdict};
use crate::executor::ExecutionRequest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PromptParams {
    pub rubric: String,
    /// Judge model; defaults to the run's model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl PromptParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.rubric.trim().is_empty() {
            return Err("required field 'rubric' is missing".into());
        }
        Ok(())
    }

    fn judge_prompt(&self, ctx: &GradingContext) -> String {
        format!(
            "You are grading an AI agent's answer.\n\n\
             Rubric:\n{}\n\n\
             Task prompt:\n{}\n\n\
             Agent output:\n{}\n\n\
             Reply with a line `VERDICT: PASS` or `VERDICT: FAIL`, optionally \
             followed by `SCORE: <0..1>` and a short justification.",
            self.rubric, ctx.prompt, ctx.output
        )
    }
}

/// Parsed judge answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct JudgeVerdict {
    pub passed: bool,
    pub score: f64,
}

/// The first standalone `PASS`/`FAIL` token decides; a `SCORE:` line
/// overrides the score.
pub(crate) fn parse_judgement(text: &str) -> Option<JudgeVerdict> {
    let passed = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|word| match word {
            "PASS" => Some(true),
            "FAIL" => Some(false),
            _ => None,
        })?;
    let score = text
        .lines()
        .find_map(|line| {
            let line = line.trim();
            let head = line.get(..6)?;
            if !head.eq_ignore_ascii_case("score:") {
                return None;
            }
            line[6..].split_whitespace().next()?.parse::<f64>().ok()
        })
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(0.0, 1.0))
        .unwrap_or(if passed { 1.0 } else { 0.0 });
    Some(JudgeVerdict { passed, score })
}

#[async_trait]
impl Grader for PromptParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let judge = ctx
            .judge
            .as_ref()
            .ok_or_else(|| GraderError::Judge("no judge executor configured".into()))?;

        let model = self.model.clone().unwrap_or_else(|| ctx.judge_model.clone());
        let request = ExecutionRequest {
            task_id: format!("{}:judge", ctx.task_id),
            prompt: self.judge_prompt(ctx),
            context: BTreeMap::new(),
            workspace_dir: ctx.workspace_dir.clone().unwrap_or_default(),
            skill: None,
            skill_paths: Vec::new(),
            model: model.clone(),
            timeout: ctx.timeout,
        };

        let response = tokio::time::timeout(ctx.timeout, judge.execute(request))
            .await
            .map_err(|_| GraderError::Judge(format!("judge timed out after {:?}", ctx.timeout)))?
            .map_err(|e| GraderError::Judge(e.to_string()))?;
        if let Some(err) = response.error {
            return Err(GraderError::Judge(err));
        }

        let answer = response.final_output;
        let verdict = parse_judgement(&answer).ok_or_else(|| {
            GraderError::Judge("judge response contained neither PASS nor FAIL".into())
        })?;
        let feedback = if verdict.passed {
            "Judge marked the output as passing".to_string()
        } else {
            format!("Judge marked the output as failing: {}", answer.trim())
        };

        Ok(Verdict::new(verdict.score, verdict.passed, feedback).with_details(json!({
            "model": model,
            "rubric": self.rubric,
            "response": answer,
        })))
    }
}
