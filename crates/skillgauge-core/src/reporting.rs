use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::{EvaluationOutcome, Status, TestOutcome};

/// Write the run document as pretty JSON, creating parent directories.
pub fn write_outcome_json(path: &Path, outcome: &EvaluationOutcome) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    let content = serde_json::to_string_pretty(outcome).context("serialize outcome")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn status_mark(status: Status) -> &'static str {
    match status {
        Status::Passed => "PASS",
        Status::Failed => "FAIL",
        Status::Error => "ERR ",
    }
}

fn render_task(out: &mut String, task: &TestOutcome) {
    out.push_str(&format!(
        "  [{}] {} ({})",
        status_mark(task.status),
        task.display_name,
        task.test_id
    ));
    if let Some(stats) = &task.stats {
        out.push_str(&format!(
            " pass {:.0}% score {:.2}",
            stats.pass_rate * 100.0,
            stats.avg_weighted_score
        ));
        if stats.flaky {
            out.push_str(" flaky");
        }
    }
    if let Some(impact) = &task.skill_impact {
        out.push_str(&format!(" delta {:+.2}", impact.delta));
    }
    out.push('\n');

    if let Some(msg) = &task.error_msg {
        out.push_str(&format!("      {msg}\n"));
    }
    for run in task.runs.iter().filter(|r| r.status != Status::Passed) {
        if let Some(msg) = &run.error_msg {
            out.push_str(&format!("      run {}: {msg}\n", run.run_number));
            continue;
        }
        for (name, result) in run.validations.iter().filter(|(_, v)| !v.passed) {
            out.push_str(&format!(
                "      run {} {name}: {}\n",
                run.run_number, result.feedback
            ));
        }
    }
}

/// Render the human-readable run summary.
pub fn render_summary(outcome: &EvaluationOutcome) -> String {
    let d = &outcome.digest;
    let mut out = String::new();
    out.push_str(&format!("Evaluation: {}", outcome.eval_name));
    if !outcome.skill.is_empty() {
        out.push_str(&format!(" (skill: {})", outcome.skill));
    }
    out.push('\n');
    out.push_str(&format!(
        "Executor: {} model: {} trials/task: {}\n\n",
        outcome.config.executor, outcome.config.model, outcome.config.trials_per_task
    ));

    out.push_str("Tasks:\n");
    for task in &outcome.tasks {
        render_task(&mut out, task);
    }
    out.push('\n');

    out.push_str(&format!(
        "Summary: {} passed, {} failed, {} errors, {} skipped of {} ({:.1}%)\n",
        d.succeeded,
        d.failed,
        d.errors,
        d.skipped,
        d.total_tests + d.skipped,
        d.success_rate * 100.0
    ));
    out.push_str(&format!(
        "Scores: aggregate {:.3} weighted {:.3} min {:.3} max {:.3} stddev {:.3}\n",
        d.aggregate_score, d.weighted_score, d.min_score, d.max_score, d.std_dev
    ));
    if let Some(stats) = &d.statistics {
        out.push_str(&format!(
            "Bootstrap CI ({:.0}%): [{:.3}, {:.3}]{}\n",
            stats.bootstrap_ci.confidence_level * 100.0,
            stats.bootstrap_ci.lower,
            stats.bootstrap_ci.upper,
            if stats.is_significant {
                " significant"
            } else {
                ""
            }
        ));
    }
    if let Some(groups) = &d.groups {
        out.push_str("Groups:\n");
        for g in groups {
            out.push_str(&format!(
                "  {}: {}/{} passed, avg score {:.3}\n",
                g.name, g.passed, g.total, g.avg_score
            ));
        }
    }
    if let Some(t) = &outcome.trigger_metrics {
        out.push_str(&format!(
            "Triggers: precision {:.4} recall {:.4} f1 {:.4} accuracy {:.4}\n",
            t.precision, t.recall, t.f1, t.accuracy
        ));
    }
    if !outcome.metrics.is_empty() {
        out.push_str("Metrics:\n");
        for m in outcome.metrics.values() {
            out.push_str(&format!(
                "  [{}] {} = {:.3} (threshold {:.3})\n",
                if m.passed { "PASS" } else { "FAIL" },
                m.identifier,
                m.value,
                m.threshold
            ));
        }
    }
    if let Some(base) = &outcome.baseline_outcome {
        out.push_str(&format!(
            "Baseline (no skills): success rate {:.1}%\n",
            base.digest.success_rate * 100.0
        ));
    }
    if outcome.canceled {
        out.push_str("Run was canceled.\n");
    }
    out.push_str(&format!("Duration: {} ms\n", d.duration_ms));
    out
}
