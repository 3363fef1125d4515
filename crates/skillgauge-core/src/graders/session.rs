//! Session-shape validators: `behavior` and `tool_constraint`.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Grader, GraderError, GradingContext, Verdict};

/// Resource and tool-usage limits, including wall-clock duration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BehaviorParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

impl BehaviorParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_tool_calls.is_none()
            && self.max_tokens.is_none()
            && self.required_tools.is_empty()
            && self.forbidden_tools.is_empty()
            && self.max_duration_ms.is_none()
        {
            return Err("must have at least one rule configured".into());
        }
        Ok(())
    }
}

#[async_trait]
impl Grader for BehaviorParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let session = &ctx.session;
        let used: HashSet<&str> = session.tools_used.iter().map(String::as_str).collect();
        let mut total = 0;
        let mut failures = Vec::new();

        if let Some(max) = self.max_tool_calls {
            total += 1;
            if session.tool_call_count > max {
                failures.push(format!(
                    "Tool call count {} exceeds max allowed {max}",
                    session.tool_call_count
                ));
            }
        }
        if let Some(max) = self.max_tokens {
            total += 1;
            if session.tokens_total > max {
                failures.push(format!(
                    "Token usage {} exceeds max allowed {max}",
                    session.tokens_total
                ));
            }
        }
        for tool in &self.required_tools {
            total += 1;
            if !used.contains(tool.as_str()) {
                failures.push(format!("Required tool not used: {tool}"));
            }
        }
        for tool in &self.forbidden_tools {
            total += 1;
            if used.contains(tool.as_str()) {
                failures.push(format!("Forbidden tool was used: {tool}"));
            }
        }
        if let Some(max) = self.max_duration_ms {
            total += 1;
            if ctx.duration_ms > max {
                failures.push(format!(
                    "Duration {}ms exceeds max allowed {max}ms",
                    ctx.duration_ms
                ));
            }
        }

        let details = json!({
            "tool_call_count": session.tool_call_count,
            "tokens_total": session.tokens_total,
            "duration_ms": ctx.duration_ms,
            "failures": failures.clone(),
        });
        Ok(Verdict::from_checks(total, failures, "All behavior checks passed").with_details(details))
    }
}

/// Expected and rejected tools plus turn/token ceilings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolConstraintParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expect_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reject_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl ToolConstraintParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.expect_tools.is_empty()
            && self.reject_tools.is_empty()
            && self.max_turns.is_none()
            && self.max_tokens.is_none()
        {
            return Err("must have at least one constraint configured".into());
        }
        Ok(())
    }
}

#[async_trait]
impl Grader for ToolConstraintParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let session = &ctx.session;
        let used: HashSet<&str> = session.tools_used.iter().map(String::as_str).collect();
        let mut total = self.expect_tools.len() + self.reject_tools.len();
        let mut failures = Vec::new();

        for tool in &self.expect_tools {
            if !used.contains(tool.as_str()) {
                failures.push(format!("Expected tool not used: {tool}"));
            }
        }
        for tool in &self.reject_tools {
            if used.contains(tool.as_str()) {
                failures.push(format!("Rejected tool was used: {tool}"));
            }
        }
        if let Some(max) = self.max_turns {
            total += 1;
            if session.total_turns > max {
                failures.push(format!(
                    "Turn count {} exceeds max allowed {max}",
                    session.total_turns
                ));
            }
        }
        if let Some(max) = self.max_tokens {
            total += 1;
            if session.tokens_total > max {
                failures.push(format!(
                    "Token usage {} exceeds max allowed {max}",
                    session.tokens_total
                ));
            }
        }

        let details = json!({
            "tools_used": session.tools_used,
            "total_turns": session.total_turns,
            "tokens_total": session.tokens_total,
            "failures": failures.clone(),
        });
        Ok(
            Verdict::from_checks(total, failures, "All tool constraint checks passed")
                .with_details(details),
        )
    }
}
