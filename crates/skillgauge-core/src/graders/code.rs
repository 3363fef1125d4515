//! `code` validator: assertions in the sandboxed expression language.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::expr::Expr;
use super::{Grader, GraderError, GradingContext, Verdict};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CodeParams {
    #[serde(default)]
    pub assertions: Vec<String>,
}

impl CodeParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        for assertion in &self.assertions {
            Expr::parse(assertion).map_err(|e| format!("assertion {assertion:?}: {e}"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Grader for CodeParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        if self.assertions.is_empty() {
            return Ok(Verdict::new(1.0, true, "No assertions configured"));
        }

        let scope = ctx.scope();
        let mut failures = Vec::new();
        for assertion in &self.assertions {
            // Runtime errors fail the assertion rather than the validator.
            match Expr::parse(assertion).and_then(|e| e.eval(&scope)) {
                Ok(value) if value.truthy() => {}
                Ok(_) => failures.push(format!("Assertion failed: {assertion}")),
                Err(e) => failures.push(format!("Assertion error: {assertion}: {e}")),
            }
        }

        let details = json!({
            "assertions": self.assertions,
            "failures": failures.clone(),
        });
        Ok(
            Verdict::from_checks(self.assertions.len(), failures, "All assertions passed")
                .with_details(details),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graders::test_support::{context, with_tools};

    fn params(assertions: &[&str]) -> CodeParams {
        CodeParams {
            assertions: assertions.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_assertions_scored_by_fraction() {
        let ctx = with_tools(context("Found 3 issues in main.py"), &["bash", "view"]);
        let p = params(&[
            "'main.py' in output",
            "len(tool_calls) == 2",
            "re.search(r'\\d+ issues', output)",
            "'edit' in tool_calls",
        ]);
        let v = p.grade(&ctx).await.unwrap();
        assert_eq!(v.score, 0.75);
        assert!(!v.passed);
        assert!(v.feedback.contains("'edit' in tool_calls"));
    }

    #[tokio::test]
    async fn test_no_assertions_passes() {
        let v = CodeParams::default().grade(&context("")).await.unwrap();
        assert_eq!(v.score, 1.0);
        assert_eq!(v.feedback, "No assertions configured");
    }

    #[tokio::test]
    async fn test_runtime_error_fails_only_that_assertion() {
        let p = params(&["1 / 0 == 1", "len(output) > 0"]);
        let v = p.grade(&context("x")).await.unwrap();
        assert_eq!(v.score, 0.5);
        assert!(v.feedback.contains("Assertion error"));
    }

    #[test]
    fn test_parse_errors_rejected_at_load() {
        assert!(params(&["len(output"]).validate().is_err());
        assert!(params(&["__import__('os')"]).validate().is_err());
        assert!(params(&["open('x')"]).validate().is_err());
        assert!(params(&["len(output) > 0"]).validate().is_ok());
    }
}
