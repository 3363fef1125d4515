//! Trigger-classification pass over a labeled prompt suite.

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::domain::{TriggerPrompt, TriggerResult, TriggerSpec};
use crate::trial::TrialExecutor;

/// Send every labeled prompt through the executor, at most `workers` at a
/// time, and record whether the skill fired.
///
/// Results come back in suite order: positives first, then negatives.
/// An executor error counts as "did not trigger" and keeps its message.
pub async fn run_trigger_suite(
    trials: &TrialExecutor,
    suite: &TriggerSpec,
    workers: usize,
) -> Vec<TriggerResult> {
    let skill = suite.skill.as_str();
    let prompts: Vec<(usize, TriggerPrompt, bool)> = suite
        .labeled()
        .enumerate()
        .map(|(i, (prompt, should_trigger))| (i, prompt.clone(), should_trigger))
        .collect();
    stream::iter(prompts)
        .map(|(i, prompt, should_trigger)| async move {
            let id = format!("trigger-{}", i + 1);
            let (did_trigger, error) = match trials.classify(&id, &prompt.prompt, skill).await {
                Ok(fired) => (fired, None),
                Err(e) => {
                    debug!(prompt_id = %id, error = %e, "trigger prompt failed");
                    (false, Some(e.to_string()))
                }
            };
            TriggerResult {
                prompt: prompt.prompt,
                confidence: prompt.confidence,
                should_trigger,
                did_trigger,
                error,
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::cancel::CancelSignal;
    use crate::domain::{BenchmarkSpec, TaskDefinition, TriggerMetrics};
    use crate::executor::{ExecutionResponse, MockExecutor, MockReply};
    use crate::loader::LoadedSpec;
    use crate::plan::{RunOptions, RunPlan};

    const SUITE: &str = r#"
skill: pdf-tools
should_trigger_prompts:
  - prompt: merge these PDFs
    confidence: high
  - prompt: split the report into pages
    confidence: medium
should_not_trigger_prompts:
  - prompt: what's the weather
"#;

    fn trials(mock: Arc<MockExecutor>) -> TrialExecutor {
        let loaded = LoadedSpec {
            spec: BenchmarkSpec::from_yaml_str(
                "name: s\nskill: pdf-tools\nconfig:\n  trials_per_task: 1\n  timeout_seconds: 5\n",
            )
            .unwrap(),
            spec_path: PathBuf::from("eval.yaml"),
            spec_dir: PathBuf::from("."),
            tasks: vec![TaskDefinition::generated("t", "t", "p")],
            trigger: None,
        };
        let plan = RunPlan::resolve(loaded, &RunOptions::default()).unwrap();
        TrialExecutor::new(mock, &plan, CancelSignal::never())
    }

    fn invoked(skills: &[&str]) -> MockReply {
        MockReply::Respond(ExecutionResponse {
            skill_invocations: skills.iter().map(|s| s.to_string()).collect(),
            success: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_suite_classification_in_order() {
        let suite = TriggerSpec::from_yaml_str(SUITE).unwrap();
        let mock = Arc::new(MockExecutor::new("m"));
        mock.script("merge these PDFs", vec![invoked(&["pdf-tools"])])
            .await;
        mock.script(
            "split the report into pages",
            vec![MockReply::Fail("rate limited".into())],
        )
        .await;
        mock.script("what's the weather", vec![invoked(&["weather"])])
            .await;

        let results = run_trigger_suite(&trials(mock.clone()), &suite, 2).await;
        assert_eq!(mock.calls(), 3);
        assert_eq!(results.len(), 3);
        assert!(results[0].should_trigger && results[0].did_trigger);
        assert!(results[1].should_trigger && !results[1].did_trigger);
        assert!(results[1].error.as_deref().unwrap().contains("rate limited"));
        assert!(!results[2].should_trigger && !results[2].did_trigger);

        let metrics = TriggerMetrics::compute(&results).unwrap();
        assert_eq!(metrics.errors, 1);
        assert_eq!(metrics.precision, 1.0);
        assert!((metrics.recall - 0.6667).abs() < 1e-9);
    }
}
