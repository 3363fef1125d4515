//! Output-text validators: `keyword` and `regex`.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Grader, GraderError, GradingContext, Verdict};

/// Case-insensitive substring checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct KeywordParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_contain: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not_contain: Vec<String>,
}

#[async_trait]
impl Grader for KeywordParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let haystack = ctx.output.to_lowercase();
        let mut failures = Vec::new();

        for keyword in &self.must_contain {
            if !haystack.contains(&keyword.to_lowercase()) {
                failures.push(format!("Missing expected keyword: {keyword}"));
            }
        }
        for keyword in &self.must_not_contain {
            if haystack.contains(&keyword.to_lowercase()) {
                failures.push(format!("Found forbidden keyword: {keyword}"));
            }
        }

        let total = self.must_contain.len() + self.must_not_contain.len();
        let details = json!({ "failures": failures.clone() });
        Ok(Verdict::from_checks(total, failures, "All keyword checks passed").with_details(details))
    }
}

/// Regular-expression checks against the final output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RegexParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_match: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not_match: Vec<String>,
}

impl RegexParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.must_match.is_empty() && self.must_not_match.is_empty() {
            return Err("must_match or must_not_match is required".into());
        }
        for pattern in self.must_match.iter().chain(&self.must_not_match) {
            Regex::new(pattern).map_err(|e| format!("invalid pattern {pattern:?}: {e}"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Grader for RegexParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let mut failures = Vec::new();
        for pattern in &self.must_match {
            if !Regex::new(pattern)?.is_match(&ctx.output) {
                failures.push(format!("Missing expected pattern: {pattern}"));
            }
        }
        for pattern in &self.must_not_match {
            if Regex::new(pattern)?.is_match(&ctx.output) {
                failures.push(format!("Found forbidden pattern: {pattern}"));
            }
        }
        let total = self.must_match.len() + self.must_not_match.len();
        Ok(Verdict::from_checks(total, failures, "All patterns matched"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graders::test_support::context;

    #[tokio::test]
    async fn test_keyword_case_insensitive() {
        let params = KeywordParams {
            must_contain: vec!["AZURE".into(), "deployed".into()],
            must_not_contain: vec!["error".into()],
        };
        let v = params.grade(&context("Deployed to azure")).await.unwrap();
        assert!(v.passed);
        assert_eq!(v.score, 1.0);
    }

    #[tokio::test]
    async fn test_keyword_partial_score() {
        let params = KeywordParams {
            must_contain: vec!["alpha".into(), "beta".into()],
            must_not_contain: vec!["gamma".into(), "delta".into()],
        };
        let v = params.grade(&context("alpha gamma")).await.unwrap();
        assert!(!v.passed);
        assert_eq!(v.score, 0.5);
        assert!(v.feedback.contains("Missing expected keyword: beta"));
        assert!(v.feedback.contains("Found forbidden keyword: gamma"));
    }

    #[tokio::test]
    async fn test_keyword_without_checks_passes() {
        let v = KeywordParams::default().grade(&context("")).await.unwrap();
        assert_eq!(v.score, 1.0);
        assert!(v.passed);
    }

    #[tokio::test]
    async fn test_regex_checks() {
        let params = RegexParams {
            must_match: vec![r"\d+ files?".into()],
            must_not_match: vec!["(?i)traceback".into()],
        };
        let v = params.grade(&context("Processed 3 files")).await.unwrap();
        assert!(v.passed);

        let v = params.grade(&context("Traceback: boom")).await.unwrap();
        assert!(!v.passed);
        assert_eq!(v.score, 0.0);
    }

    #[test]
    fn test_regex_validation() {
        assert!(RegexParams::default().validate().is_err());
        let bad = RegexParams {
            must_match: vec!["[".into()],
            must_not_match: vec![],
        };
        assert!(bad.validate().is_err());
    }
}
