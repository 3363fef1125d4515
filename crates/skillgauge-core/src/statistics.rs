//! Per-task and per-run statistics.
//!
//! Everything here is a pure function over finished [`RunResult`]s and
//! [`TestOutcome`]s. The bootstrap generator is seeded from the sampled
//! values, so the same outcomes always yield the same intervals.

use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{
    GroupStats, OutcomeDigest, RunResult, SkillImpact, StatisticalSummary, Status, TestOutcome,
    TestStats,
};

/// Resamples drawn per bootstrap interval.
pub const DEFAULT_BOOTSTRAP_ITERATIONS: usize = 10_000;

/// Confidence level used for every interval in the run document.
pub const CONFIDENCE_LEVEL: f64 = 0.95;

/// Percentile-bootstrap interval around a mean.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub mean: f64,
    pub confidence_level: f64,
    pub num_bootstraps: usize,
}

/// Bootstrap interval seeded from the values themselves.
///
/// A cached rerun restores identical scores and therefore identical intervals.
pub fn bootstrap_ci(values: &[f64], confidence: f64) -> ConfidenceInterval {
    bootstrap_ci_seeded(
        values,
        confidence,
        DEFAULT_BOOTSTRAP_ITERATIONS,
        seed_from_values(values),
    )
}

fn seed_from_values(values: &[f64]) -> u64 {
    let mut hasher = Sha256::new();
    for v in values {
        hasher.update(v.to_bits().to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}

/// Bootstrap interval with a fixed seed.
pub fn bootstrap_ci_seeded(
    values: &[f64],
    confidence: f64,
    iterations: usize,
    seed: u64,
) -> ConfidenceInterval {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    bootstrap_with(values, confidence, iterations, &mut rng)
}

fn bootstrap_with(
    values: &[f64],
    confidence: f64,
    iterations: usize,
    rng: &mut ChaCha8Rng,
) -> ConfidenceInterval {
    let m = mean(values);
    let n = values.len();
    if n < 2 || iterations == 0 {
        return ConfidenceInterval {
            lower: m,
            upper: m,
            mean: m,
            confidence_level: confidence,
            num_bootstraps: 0,
        };
    }

    let mut means = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let mut sum = 0.0;
        for _ in 0..n {
            sum += values[rng.random_range(0..n)];
        }
        means.push(sum / n as f64);
    }
    means.sort_by(f64::total_cmp);

    let alpha = 1.0 - confidence;
    let lo = ((alpha / 2.0) * iterations as f64).floor() as usize;
    let hi = (((1.0 - alpha / 2.0) * iterations as f64).floor() as usize).min(iterations - 1);

    ConfidenceInterval {
        lower: means[lo.min(iterations - 1)],
        upper: means[hi],
        mean: m,
        confidence_level: confidence,
        num_bootstraps: iterations,
    }
}

/// Whether the interval lies entirely on one side of `threshold`.
pub fn is_significant(ci: &ConfidenceInterval, threshold: f64) -> bool {
    ci.lower > threshold || ci.upper < threshold
}

/// Hake's normalized gain `(post - pre) / (1 - pre)`.
///
/// 0 at the ceiling or with no change; 1 once `post` reaches the ceiling.
pub fn normalized_gain(pre: f64, post: f64) -> f64 {
    if pre >= 1.0 {
        return 0.0;
    }
    if post >= 1.0 {
        return 1.0;
    }
    if (post - pre).abs() < 1e-12 {
        return 0.0;
    }
    (post - pre) / (1.0 - pre)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn min_max(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        })
}

/// Statistics over one task's runs; `None` when there are no runs.
///
/// The interval is only computed when more than one trial was configured.
pub fn task_stats(runs: &[RunResult], trials: u32, threshold: f64) -> Option<TestStats> {
    if runs.is_empty() {
        return None;
    }
    let n = runs.len() as f64;
    let passed = runs.iter().filter(|r| r.status == Status::Passed).count();
    let scores: Vec<f64> = runs.iter().map(RunResult::score).collect();
    let weighted: Vec<f64> = runs.iter().map(RunResult::weighted_score).collect();
    let (min_score, max_score) = min_max(&weighted);
    let std = std_dev(&weighted);
    let total_ms: u64 = runs.iter().map(|r| r.duration_ms).sum();

    let mut stats = TestStats {
        pass_rate: passed as f64 / n,
        avg_score: mean(&scores),
        avg_weighted_score: mean(&weighted),
        min_score,
        max_score,
        std_dev_score: std,
        score_variance: std * std,
        avg_duration_ms: total_ms / runs.len() as u64,
        flaky: passed > 0 && passed < runs.len(),
        ..TestStats::default()
    };

    if trials > 1 && runs.len() > 1 {
        let ci = bootstrap_ci(&weighted, CONFIDENCE_LEVEL);
        stats.ci95_lo = Some(ci.lower);
        stats.ci95_hi = Some(ci.upper);
        stats.is_significant = Some(is_significant(&ci, threshold));
        stats.bootstrap_ci = Some(ci);
    }
    Some(stats)
}

/// With-skill vs. baseline pass rates for one task.
pub fn skill_impact(with_skills: &TestOutcome, baseline: &TestOutcome) -> SkillImpact {
    let with = with_skills.pass_rate();
    let base = baseline.pass_rate();
    let delta = with - base;
    SkillImpact {
        pass_rate_with_skills: with,
        pass_rate_baseline: base,
        delta,
        percent_change: if base > 0.0 { delta / base * 100.0 } else { 0.0 },
    }
}

/// Inputs to the run digest besides the outcomes themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestParams {
    /// Tasks never dispatched (fail-fast or cancellation).
    pub skipped: usize,
    pub duration_ms: u64,
    pub trials_per_task: u32,
    pub threshold: f64,
}

/// Roll task outcomes up into the run digest.
pub fn digest(outcomes: &[TestOutcome], params: DigestParams) -> OutcomeDigest {
    let count = |s: Status| outcomes.iter().filter(|o| o.status == s).count();
    let succeeded = count(Status::Passed);
    let total = outcomes.len();

    let task_scores: Vec<f64> = outcomes
        .iter()
        .map(|o| o.stats.as_ref().map(|s| s.avg_score).unwrap_or(0.0))
        .collect();
    let task_weighted: Vec<f64> = outcomes
        .iter()
        .map(|o| o.stats.as_ref().map(|s| s.avg_weighted_score).unwrap_or(0.0))
        .collect();
    let (min_score, max_score) = min_max(&task_scores);

    let statistics = if params.trials_per_task > 1 {
        let with_stats: Vec<f64> = outcomes
            .iter()
            .filter_map(|o| o.stats.as_ref().map(|s| s.avg_weighted_score))
            .collect();
        (with_stats.len() >= 2).then(|| {
            let ci = bootstrap_ci(&with_stats, CONFIDENCE_LEVEL);
            StatisticalSummary {
                is_significant: is_significant(&ci, params.threshold),
                bootstrap_ci: ci,
                normalized_gain: None,
            }
        })
    } else {
        None
    };

    OutcomeDigest {
        total_tests: total,
        succeeded,
        failed: count(Status::Failed),
        errors: count(Status::Error),
        skipped: params.skipped,
        success_rate: if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64
        },
        aggregate_score: mean(&task_scores),
        weighted_score: mean(&task_weighted),
        min_score,
        max_score,
        std_dev: std_dev(&task_scores),
        duration_ms: params.duration_ms,
        groups: group_stats(outcomes),
        statistics,
    }
}

/// Per-group breakdown in first-seen order; `None` when no task is grouped.
pub fn group_stats(outcomes: &[TestOutcome]) -> Option<Vec<GroupStats>> {
    let mut groups: Vec<(GroupStats, f64, usize)> = Vec::new();
    for outcome in outcomes {
        let Some(name) = outcome.group.as_deref() else {
            continue;
        };
        let idx = match groups.iter().position(|(g, _, _)| g.name == name) {
            Some(idx) => idx,
            None => {
                groups.push((
                    GroupStats {
                        name: name.to_string(),
                        passed: 0,
                        total: 0,
                        avg_score: 0.0,
                    },
                    0.0,
                    0,
                ));
                groups.len() - 1
            }
        };
        let (group, score_total, scored) = &mut groups[idx];
        group.total += 1;
        if outcome.status == Status::Passed {
            group.passed += 1;
        }
        if let Some(stats) = &outcome.stats {
            *score_total += stats.avg_score;
            *scored += 1;
        }
    }
    if groups.is_empty() {
        return None;
    }
    Some(
        groups
            .into_iter()
            .map(|(mut g, total, scored)| {
                if scored > 0 {
                    g.avg_score = total / scored as f64;
                }
                g
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::GraderResult;
    use crate::graders::GraderKind;

    fn run(status: Status, score: f64, duration_ms: u64) -> RunResult {
        let mut validations = BTreeMap::new();
        validations.insert(
            "g".to_string(),
            GraderResult {
                identifier: "g".into(),
                kind: GraderKind::Keyword,
                score,
                weight: 1.0,
                passed: status == Status::Passed,
                feedback: String::new(),
                details: None,
                duration_ms: 0,
            },
        );
        RunResult {
            run_number: 1,
            attempts: 1,
            status,
            duration_ms,
            validations,
            session_digest: Default::default(),
            transcript: Vec::new(),
            final_output: String::new(),
            error_msg: None,
        }
    }

    fn outcome(id: &str, status: Status, runs: Vec<RunResult>, group: Option<&str>) -> TestOutcome {
        TestOutcome {
            test_id: id.into(),
            display_name: id.into(),
            group: group.map(String::from),
            status,
            stats: task_stats(&runs, runs.len() as u32, 0.0),
            runs,
            skill_impact: None,
            error_msg: None,
        }
    }

    #[test]
    fn test_seeded_bootstrap_is_reproducible() {
        let values = [0.2, 0.4, 0.6, 0.8, 1.0];
        let a = bootstrap_ci_seeded(&values, 0.95, 2_000, 7);
        let b = bootstrap_ci_seeded(&values, 0.95, 2_000, 7);
        assert_eq!(a, b);
        assert!((a.mean - 0.6).abs() < 1e-12);
        assert!(a.lower <= a.mean && a.mean <= a.upper);
        assert!(a.lower >= 0.2 && a.upper <= 1.0);
        assert_eq!(a.num_bootstraps, 2_000);
    }

    #[test]
    fn test_bootstrap_seed_follows_values() {
        let values = [0.1, 0.9, 0.4, 0.7];
        assert_eq!(bootstrap_ci(&values, 0.95), bootstrap_ci(&values, 0.95));
        assert_ne!(seed_from_values(&values), seed_from_values(&[0.1, 0.9, 0.4]));
    }

    #[test]
    fn test_digest_is_stable_across_calls() {
        let outcomes: Vec<TestOutcome> = (0..7)
            .map(|i| {
                let score = i as f64 / 7.0;
                outcome(
                    &format!("t{i}"),
                    Status::Failed,
                    vec![run(Status::Passed, 1.0, 1), run(Status::Failed, score, 1)],
                    None,
                )
            })
            .collect();
        let params = DigestParams {
            trials_per_task: 2,
            ..Default::default()
        };
        let first = digest(&outcomes, params);
        assert!(first.statistics.is_some());
        for _ in 0..20 {
            assert_eq!(digest(&outcomes, params), first);
        }
    }

    #[test]
    fn test_bootstrap_degenerate_inputs() {
        let ci = bootstrap_ci_seeded(&[0.7], 0.95, 100, 1);
        assert_eq!((ci.lower, ci.upper, ci.mean), (0.7, 0.7, 0.7));
        assert_eq!(ci.num_bootstraps, 0);

        let ci = bootstrap_ci_seeded(&[], 0.95, 100, 1);
        assert_eq!(ci.mean, 0.0);

        let ci = bootstrap_ci_seeded(&[0.5, 0.5, 0.5], 0.95, 500, 3);
        assert_eq!((ci.lower, ci.upper), (0.5, 0.5));
    }

    #[test]
    fn test_significance_against_threshold() {
        let ci = ConfidenceInterval {
            lower: 0.6,
            upper: 0.9,
            mean: 0.75,
            confidence_level: 0.95,
            num_bootstraps: 10,
        };
        assert!(is_significant(&ci, 0.5));
        assert!(!is_significant(&ci, 0.7));
        assert!(is_significant(&ci, 0.95));
    }

    #[test]
    fn test_normalized_gain() {
        assert_eq!(normalized_gain(1.0, 1.0), 0.0);
        assert_eq!(normalized_gain(0.4, 1.0), 1.0);
        assert_eq!(normalized_gain(0.5, 0.5), 0.0);
        assert!((normalized_gain(0.5, 0.75) - 0.5).abs() < 1e-12);
        assert!(normalized_gain(0.5, 0.25) < 0.0);
    }

    #[test]
    fn test_std_dev_is_population() {
        assert!((std_dev(&[1.0, 0.0]) - 0.5).abs() < 1e-12);
        assert_eq!(std_dev(&[0.3]), 0.0);
    }

    #[test]
    fn test_task_stats_flaky_and_ci() {
        let runs = vec![
            run(Status::Passed, 1.0, 10),
            run(Status::Failed, 0.0, 30),
            run(Status::Passed, 1.0, 20),
        ];
        let stats = task_stats(&runs, 3, 0.0).unwrap();
        assert!((stats.pass_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!(stats.flaky);
        assert_eq!(stats.min_score, 0.0);
        assert_eq!(stats.max_score, 1.0);
        assert_eq!(stats.avg_duration_ms, 20);
        assert!((stats.score_variance - stats.std_dev_score.powi(2)).abs() < 1e-12);
        let ci = stats.bootstrap_ci.unwrap();
        assert_eq!(ci.num_bootstraps, DEFAULT_BOOTSTRAP_ITERATIONS);
        assert_eq!(stats.ci95_lo, Some(ci.lower));
        assert!(stats.is_significant.is_some());
    }

    #[test]
    fn test_single_trial_has_no_interval() {
        let stats = task_stats(&[run(Status::Passed, 1.0, 5)], 1, 0.0).unwrap();
        assert!(!stats.flaky);
        assert!(stats.bootstrap_ci.is_none());
        assert!(stats.ci95_lo.is_none());
        assert!(task_stats(&[], 1, 0.0).is_none());
    }

    #[test]
    fn test_skill_impact() {
        let with = outcome(
            "t",
            Status::Failed,
            vec![run(Status::Passed, 1.0, 1), run(Status::Failed, 0.0, 1)],
            None,
        );
        let base = outcome(
            "t",
            Status::Failed,
            vec![run(Status::Failed, 0.0, 1), run(Status::Failed, 0.0, 1)],
            None,
        );
        let impact = skill_impact(&with, &base);
        assert_eq!(impact.delta, 0.5);
        assert_eq!(impact.percent_change, 0.0);

        let impact = skill_impact(&with, &with);
        assert_eq!(impact.delta, 0.0);
    }

    #[test]
    fn test_percent_change() {
        let with = outcome("t", Status::Passed, vec![run(Status::Passed, 1.0, 1)], None);
        let base = outcome(
            "t",
            Status::Failed,
            vec![run(Status::Passed, 1.0, 1), run(Status::Failed, 0.0, 1)],
            None,
        );
        let impact = skill_impact(&with, &base);
        assert!((impact.percent_change - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_digest_counts_and_groups() {
        let outcomes = vec![
            outcome("a", Status::Passed, vec![run(Status::Passed, 1.0, 1)], Some("gpt")),
            outcome("b", Status::Failed, vec![run(Status::Failed, 0.5, 1)], Some("gpt")),
            outcome("c", Status::Error, vec![], Some("claude")),
        ];
        let d = digest(
            &outcomes,
            DigestParams {
                skipped: 2,
                duration_ms: 42,
                trials_per_task: 1,
                threshold: 0.0,
            },
        );
        assert_eq!((d.total_tests, d.succeeded, d.failed, d.errors), (3, 1, 1, 1));
        assert_eq!(d.skipped, 2);
        assert!((d.success_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((d.aggregate_score - 0.5).abs() < 1e-12);
        assert_eq!((d.min_score, d.max_score), (0.0, 1.0));
        assert!(d.statistics.is_none());

        let groups = d.groups.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "gpt");
        assert_eq!((groups[0].passed, groups[0].total), (1, 2));
        assert!((groups[0].avg_score - 0.75).abs() < 1e-12);
        assert_eq!(groups[1].avg_score, 0.0);
    }

    #[test]
    fn test_digest_summary_for_multi_trial() {
        let outcomes = vec![
            outcome(
                "a",
                Status::Passed,
                vec![run(Status::Passed, 1.0, 1), run(Status::Passed, 0.8, 1)],
                None,
            ),
            outcome(
                "b",
                Status::Failed,
                vec![run(Status::Failed, 0.2, 1), run(Status::Passed, 1.0, 1)],
                None,
            ),
        ];
        let d = digest(
            &outcomes,
            DigestParams {
                trials_per_task: 2,
                ..Default::default()
            },
        );
        assert!(d.groups.is_none());
        let summary = d.statistics.unwrap();
        assert!(summary.bootstrap_ci.lower <= summary.bootstrap_ci.upper);
        assert!(summary.normalized_gain.is_none());
    }

    #[test]
    fn test_empty_digest() {
        let d = digest(&[], DigestParams::default());
        assert_eq!(d.total_tests, 0);
        assert_eq!(d.success_rate, 0.0);
        assert_eq!(d.std_dev, 0.0);
    }
}
