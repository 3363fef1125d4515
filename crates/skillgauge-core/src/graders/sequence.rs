//! Sequence matching for tool-call order and skill invocations.
//!
//! True positives count each expected element at most as often as it is
//! expected: `TP = Σ min(expected[x], actual[x])`. Precision is `TP/|actual|`,
//! recall `TP/|expected|`, and both are 1.0 when both sequences are empty.
//! The `passed` flag reflects the mode's structural constraint; the score is
//! always F1.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Grader, GraderError, GradingContext, Verdict};

/// Structural constraint on the actual sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Same elements, same order, same length.
    Exact,
    /// Expected elements appear in order; extras allowed in between.
    InOrder,
    /// Expected elements appear with at least their multiplicity.
    AnyOrder,
}

/// Result of matching an actual sequence against an expected one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceMatch {
    pub true_positives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub passed: bool,
}

fn counts<S: AsRef<str>>(items: &[S]) -> HashMap<&str, usize> {
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        *map.entry(item.as_ref()).or_insert(0) += 1;
    }
    map
}

/// Match `actual` against `expected` under `mode`.
pub fn match_sequence<E, A>(expected: &[E], actual: &[A], mode: MatchMode) -> SequenceMatch
where
    E: AsRef<str>,
    A: AsRef<str>,
{
    let expected_counts = counts(expected);
    let actual_counts = counts(actual);

    let true_positives: usize = expected_counts
        .iter()
        .map(|(item, need)| (*need).min(actual_counts.get(item).copied().unwrap_or(0)))
        .sum();

    let (precision, recall) = if expected.is_empty() && actual.is_empty() {
        (1.0, 1.0)
    } else {
        let p = if actual.is_empty() {
            0.0
        } else {
            true_positives as f64 / actual.len() as f64
        };
        let r = if expected.is_empty() {
            0.0
        } else {
            true_positives as f64 / expected.len() as f64
        };
        (p, r)
    };

    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    let passed = match mode {
        MatchMode::Exact => {
            expected.len() == actual.len()
                && expected
                    .iter()
                    .zip(actual)
                    .all(|(e, a)| e.as_ref() == a.as_ref())
        }
        MatchMode::InOrder => {
            let mut next = 0;
            for a in actual {
                if next < expected.len() && a.as_ref() == expected[next].as_ref() {
                    next += 1;
                }
            }
            next == expected.len()
        }
        MatchMode::AnyOrder => expected_counts
            .iter()
            .all(|(item, need)| actual_counts.get(item).copied().unwrap_or(0) >= *need),
    };

    SequenceMatch {
        true_positives,
        precision,
        recall,
        f1,
        passed,
    }
}

/// Matching mode names accepted by `action_sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMatchingMode {
    ExactMatch,
    InOrderMatch,
    AnyOrderMatch,
}

impl From<ActionMatchingMode> for MatchMode {
    fn from(mode: ActionMatchingMode) -> Self {
        match mode {
            ActionMatchingMode::ExactMatch => MatchMode::Exact,
            ActionMatchingMode::InOrderMatch => MatchMode::InOrder,
            ActionMatchingMode::AnyOrderMatch => MatchMode::AnyOrder,
        }
    }
}

/// Compares the tool-call sequence with an expected action path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ActionSequenceParams {
    #[serde(default)]
    pub expected_actions: Vec<String>,
    pub matching_mode: ActionMatchingMode,
}

impl ActionSequenceParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.expected_actions.is_empty() {
            return Err("must have at least one expected_actions entry".into());
        }
        Ok(())
    }
}

#[async_trait]
impl Grader for ActionSequenceParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let actual = &ctx.session.tools_used;
        let m = match_sequence(
            self.expected_actions.as_slice(),
            actual.as_slice(),
            self.matching_mode.into(),
        );
        let feedback = if m.passed {
            "Action sequence matched".to_string()
        } else {
            format!(
                "Action sequence mismatch ({:?}): expected {:?}, got {:?}",
                self.matching_mode, self.expected_actions, actual
            )
        };
        Ok(Verdict::new(m.f1, m.passed, feedback).with_details(json!({
            "matching_mode": self.matching_mode,
            "expected_actions": self.expected_actions,
            "actual_actions": actual,
            "precision": m.precision,
            "recall": m.recall,
            "f1": m.f1,
        })))
    }
}

/// Matching mode names accepted by `skill_invocation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillMatchingMode {
    ExactMatch,
    InOrder,
    AnyOrder,
}

impl From<SkillMatchingMode> for MatchMode {
    fn from(mode: SkillMatchingMode) -> Self {
        match mode {
            SkillMatchingMode::ExactMatch => MatchMode::Exact,
            SkillMatchingMode::InOrder => MatchMode::InOrder,
            SkillMatchingMode::AnyOrder => MatchMode::AnyOrder,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Compares invoked skills with the required ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SkillInvocationParams {
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub mode: SkillMatchingMode,
    #[serde(default = "default_true")]
    pub allow_extra: bool,
}

impl SkillInvocationParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.required_skills.is_empty() {
            return Err("must have at least one required_skills entry".into());
        }
        Ok(())
    }
}

/// Score penalty factor applied per extra invocation share.
const EXTRA_INVOCATION_PENALTY: f64 = 0.6;

#[async_trait]
impl Grader for SkillInvocationParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let actual = &ctx.session.skills_invoked;
        let m = match_sequence(
            self.required_skills.as_slice(),
            actual.as_slice(),
            self.mode.into(),
        );

        let extra = actual.len().saturating_sub(self.required_skills.len());
        let penalized = !self.allow_extra && extra > 0;
        let score = if penalized {
            m.f1 * (1.0 - EXTRA_INVOCATION_PENALTY * extra as f64 / actual.len() as f64)
        } else {
            m.f1
        };
        let feedback = if !m.passed {
            format!(
                "Skill invocation mismatch ({:?}): expected {:?}, got {:?}",
                self.mode, self.required_skills, actual
            )
        } else if penalized {
            format!(
                "Skill invocation sequence matched but had extra invocations (got {}, expected {})",
                actual.len(),
                self.required_skills.len()
            )
        } else {
            "Skill invocation sequence matched".to_string()
        };

        Ok(Verdict::new(score, m.passed, feedback).with_details(json!({
            "mode": self.mode,
            "required_skills": self.required_skills,
            "actual_skills": actual,
            "allow_extra": self.allow_extra,
            "precision": m.precision,
            "recall": m.recall,
            "f1": m.f1,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graders::test_support::context;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_in_order_with_extras() {
        let m = match_sequence(
            &["bash", "edit"],
            &["bash", "view", "edit", "report_progress"],
            MatchMode::InOrder,
        );
        assert!(m.passed);
        assert!(close(m.precision, 0.5));
        assert!(close(m.recall, 1.0));
        assert!(close(m.f1, 0.667));
    }

    #[test]
    fn test_in_order_wrong_order_fails() {
        let m = match_sequence(&["bash", "edit"], &["edit", "bash"], MatchMode::InOrder);
        assert!(!m.passed);
        assert!(close(m.f1, 1.0));
    }

    #[test]
    fn test_exact_mode() {
        assert!(match_sequence(&["a", "b"], &["a", "b"], MatchMode::Exact).passed);
        assert!(!match_sequence(&["a", "b"], &["a", "b", "c"], MatchMode::Exact).passed);
        assert!(!match_sequence(&["a", "b"], &["b", "a"], MatchMode::Exact).passed);
    }

    #[test]
    fn test_any_order_multiplicity() {
        let m = match_sequence(&["bash", "bash"], &["edit", "bash"], MatchMode::AnyOrder);
        assert!(!m.passed);
        assert_eq!(m.true_positives, 1);
        assert!(match_sequence(&["bash", "bash"], &["bash", "x", "bash"], MatchMode::AnyOrder).passed);
    }

    #[test]
    fn test_empty_sequences() {
        let none: [&str; 0] = [];
        let m = match_sequence(&none, &none, MatchMode::Exact);
        assert_eq!((m.precision, m.recall, m.f1), (1.0, 1.0, 1.0));
        let m = match_sequence(&["a"], &none, MatchMode::AnyOrder);
        assert_eq!(m.f1, 0.0);
        assert!(!m.passed);
    }

    #[tokio::test]
    async fn test_action_sequence_grader_uses_tools() {
        let params: ActionSequenceParams = serde_json::from_value(json!({
            "expected_actions": ["bash", "edit"],
            "matching_mode": "in_order_match"
        }))
        .unwrap();
        let ctx = crate::graders::test_support::with_tools(
            context(""),
            &["bash", "view", "edit", "report_progress"],
        );
        let v = params.grade(&ctx).await.unwrap();
        assert!(v.passed);
        assert!(close(v.score, 0.667));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = serde_json::from_value::<ActionSequenceParams>(json!({
            "expected_actions": ["a"],
            "matching_mode": "fuzzy"
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_mode_rejected() {
        let action = serde_json::from_value::<ActionSequenceParams>(json!({
            "expected_actions": ["a"]
        }));
        assert!(action.is_err());
        let skill = serde_json::from_value::<SkillInvocationParams>(json!({
            "required_skills": ["azure"]
        }));
        assert!(skill.is_err());
    }

    #[tokio::test]
    async fn test_skill_invocation_extra_penalty() {
        let params = SkillInvocationParams {
            required_skills: vec!["azure".into()],
            mode: SkillMatchingMode::AnyOrder,
            allow_extra: false,
        };
        let mut ctx = context("");
        ctx.session.skills_invoked = vec!["azure".into(), "docs".into()];
        let v = params.grade(&ctx).await.unwrap();
        // P = 0.5, R = 1, F1 = 2/3; penalty 0.6 * 1/2.
        assert!(close(v.score, (2.0 / 3.0) * 0.7));
        assert!(v.passed, "extra invocations lower the score only");
        assert!(v.feedback.contains("extra invocations"));

        let lenient = SkillInvocationParams {
            allow_extra: true,
            ..params
        };
        let v = lenient.grade(&ctx).await.unwrap();
        assert!(v.passed);
        assert!(close(v.score, 2.0 / 3.0));
    }
}
