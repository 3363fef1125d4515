//! Runs every configured validator against one attempt.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::debug;

use super::{GraderSpec, GradingContext, Verdict};
use crate::domain::{GraderResult, TaskDefinition};

/// Ordered validators for one task: global ones first, then the task's own.
#[derive(Debug, Clone, Default)]
pub struct GraderPipeline {
    graders: Vec<GraderSpec>,
}

impl GraderPipeline {
    pub fn new(graders: Vec<GraderSpec>) -> Self {
        Self { graders }
    }

    /// Global validators plus the task's effective validators.
    pub fn for_task(global: &[GraderSpec], task: &TaskDefinition) -> Self {
        let mut graders = global.to_vec();
        graders.extend(task.effective_graders());
        Self::new(graders)
    }

    pub fn graders(&self) -> &[GraderSpec] {
        &self.graders
    }

    pub fn is_empty(&self) -> bool {
        self.graders.is_empty()
    }

    /// Grade one attempt. Never fails: a validator error becomes a zero
    /// score for that validator with the error in its feedback.
    pub async fn run(&self, ctx: &GradingContext) -> BTreeMap<String, GraderResult> {
        let mut results = BTreeMap::new();
        for spec in &self.graders {
            let started = Instant::now();
            let verdict = match spec.params.grader().grade(ctx).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    debug!(
                        task_id = %ctx.task_id,
                        grader = %spec.name,
                        kind = %spec.kind(),
                        error = %e,
                        "validator failed to complete"
                    );
                    Verdict::fail(format!("Grader error: {e}"))
                }
            };
            let score = if verdict.score.is_finite() {
                verdict.score.clamp(0.0, 1.0)
            } else {
                0.0
            };
            results.insert(
                spec.name.clone(),
                GraderResult {
                    identifier: spec.name.clone(),
                    kind: spec.kind(),
                    score,
                    weight: spec.effective_weight(),
                    passed: verdict.passed,
                    feedback: verdict.feedback,
                    details: verdict.details,
                    duration_ms: started.elapsed().as_millis() as u64,
                },
            );
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::composite_score;
    use crate::graders::test_support::context;
    use crate::graders::GraderKind;

    fn grader(yaml: &str) -> GraderSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_weighted_composite() {
        let pipeline = GraderPipeline::new(vec![
            grader("type: keyword\nname: has-done\nweight: 3\nconfig:\n  must_contain: [done]\n"),
            grader("type: keyword\nname: has-tests\nweight: 1\nconfig:\n  must_contain: [tests]\n"),
        ]);
        let results = pipeline.run(&context("all done")).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results["has-done"].score, 1.0);
        assert_eq!(results["has-tests"].score, 0.0);
        assert_eq!(composite_score(results.values()), 0.75);
    }

    #[tokio::test]
    async fn test_grader_error_is_contained() {
        let pipeline = GraderPipeline::new(vec![
            grader("type: program\nname: broken\nconfig:\n  command: /nonexistent/grader-bin\n"),
            grader("type: keyword\nname: ok\nconfig:\n  must_contain: [x]\n"),
        ]);
        let results = pipeline.run(&context("x")).await;
        let broken = &results["broken"];
        assert_eq!(broken.kind, GraderKind::Program);
        assert_eq!(broken.score, 0.0);
        assert!(!broken.passed);
        assert!(broken.feedback.starts_with("Grader error:"));
        assert!(results["ok"].passed);
    }

    #[tokio::test]
    async fn test_for_task_adds_output_contains() {
        let task = TaskDefinition::from_yaml_str(
            "id: t\nexpected:\n  output_contains: [Mock]\ngraders:\n  - type: regex\n    name: r\n    config:\n      must_match: ['resp']\n",
        )
        .unwrap();
        let global = vec![grader("type: keyword\nname: g\n")];
        let pipeline = GraderPipeline::for_task(&global, &task);
        let names: Vec<&str> = pipeline.graders().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["g", "r", "output_contains"]);

        let results = pipeline.run(&context("Mock response")).await;
        assert!(results.values().all(|r| r.passed));
    }
}
