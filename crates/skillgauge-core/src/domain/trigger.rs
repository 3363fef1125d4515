//! Trigger-classification inputs and confidence-weighted metrics.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{Result, SkillGaugeError};

/// File name of the trigger suite, looked up next to the benchmark spec.
pub const TRIGGER_SPEC_FILE: &str = "trigger_tests.yaml";

/// How unambiguous a labeled prompt is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    #[serde(rename = "")]
    Unspecified,
    High,
    Medium,
}

impl Confidence {
    /// Contribution of one sample to its confusion-matrix cell.
    pub fn weight(self) -> f64 {
        match self {
            Confidence::Medium => 0.5,
            Confidence::High | Confidence::Unspecified => 1.0,
        }
    }
}

/// One labeled prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TriggerPrompt {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub confidence: Confidence,
}

/// Labeled prompts for one skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TriggerSpec {
    #[serde(default)]
    pub skill: String,
    #[serde(default)]
    pub should_trigger_prompts: Vec<TriggerPrompt>,
    #[serde(default)]
    pub should_not_trigger_prompts: Vec<TriggerPrompt>,
}

impl TriggerSpec {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let spec: TriggerSpec = serde_yaml::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Load the trigger suite next to `spec_path`, if one exists.
    pub fn load_beside(spec_path: &Path) -> Result<Option<Self>> {
        let dir = spec_path.parent().unwrap_or_else(|| Path::new("."));
        let path = dir.join(TRIGGER_SPEC_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Self::from_yaml_str(&text).map(Some)
    }

    pub fn validate(&self) -> Result<()> {
        if self.skill.trim().is_empty() {
            return Err(SkillGaugeError::InvalidSpec(format!(
                "{TRIGGER_SPEC_FILE}: 'skill' is required"
            )));
        }
        if self.should_trigger_prompts.is_empty() && self.should_not_trigger_prompts.is_empty() {
            return Err(SkillGaugeError::InvalidSpec(format!(
                "{TRIGGER_SPEC_FILE}: at least one prompt is required"
            )));
        }
        for p in self
            .should_trigger_prompts
            .iter()
            .chain(&self.should_not_trigger_prompts)
        {
            if p.prompt.trim().is_empty() {
                return Err(SkillGaugeError::InvalidSpec(format!(
                    "{TRIGGER_SPEC_FILE}: prompt text must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// All prompts labeled with their expected trigger flag, positives first.
    pub fn labeled(&self) -> impl Iterator<Item = (&TriggerPrompt, bool)> {
        self.should_trigger_prompts
            .iter()
            .map(|p| (p, true))
            .chain(self.should_not_trigger_prompts.iter().map(|p| (p, false)))
    }
}

/// Expected vs. observed trigger for one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerResult {
    pub prompt: String,
    pub confidence: Confidence,
    pub should_trigger: bool,
    pub did_trigger: bool,
    /// Executor error text, if the call failed.
    pub error: Option<String>,
}

/// Confidence-weighted confusion matrix and derived rates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerMetrics {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub errors: u64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl TriggerMetrics {
    /// Compute metrics from classification results; `None` when empty.
    ///
    /// Rates are rounded to four decimals and weighted cell counts to the
    /// nearest integer.
    pub fn compute(results: &[TriggerResult]) -> Option<Self> {
        if results.is_empty() {
            return None;
        }

        let (mut tp, mut fp, mut tn, mut fneg) = (0.0, 0.0, 0.0, 0.0);
        for r in results {
            let w = r.confidence.weight();
            match (r.should_trigger, r.did_trigger) {
                (true, true) => tp += w,
                (false, true) => fp += w,
                (false, false) => tn += w,
                (true, false) => fneg += w,
            }
        }

        let precision = safe_div(tp, tp + fp);
        let recall = safe_div(tp, tp + fneg);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let accuracy = safe_div(tp + tn, tp + fp + tn + fneg);

        Some(Self {
            true_positives: tp.round() as u64,
            false_positives: fp.round() as u64,
            true_negatives: tn.round() as u64,
            false_negatives: fneg.round() as u64,
            errors: results.iter().filter(|r| r.error.is_some()).count() as u64,
            precision: round4(precision),
            recall: round4(recall),
            f1: round4(f1),
            accuracy: round4(accuracy),
        })
    }
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(should: bool, did: bool, confidence: Confidence) -> TriggerResult {
        TriggerResult {
            prompt: "p".into(),
            confidence,
            should_trigger: should,
            did_trigger: did,
            error: None,
        }
    }

    #[test]
    fn test_empty_results_yield_none() {
        assert!(TriggerMetrics::compute(&[]).is_none());
    }

    #[test]
    fn test_confidence_weighted_metrics() {
        let results = vec![
            result(true, true, Confidence::High),
            result(false, true, Confidence::Medium),
            result(false, false, Confidence::Medium),
        ];
        let m = TriggerMetrics::compute(&results).unwrap();
        assert_eq!(m.precision, 0.6667);
        assert_eq!(m.recall, 1.0);
        assert_eq!(m.f1, 0.8);
        assert_eq!(m.accuracy, 0.75);
        assert_eq!(m.true_positives, 1);
        assert_eq!(m.false_negatives, 0);
    }

    #[test]
    fn test_all_wrong_is_zero_without_nan() {
        let results = vec![
            result(true, false, Confidence::High),
            result(false, true, Confidence::Unspecified),
        ];
        let m = TriggerMetrics::compute(&results).unwrap();
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn test_spec_parses_and_validates() {
        let yaml = r#"
skill: azure-deploy
should_trigger_prompts:
  - prompt: deploy my app to azure
    reason: direct request
  - prompt: ship it
    confidence: medium
should_not_trigger_prompts:
  - prompt: what is the weather
    confidence: high
"#;
        let spec = TriggerSpec::from_yaml_str(yaml).unwrap();
        assert_eq!(spec.labeled().count(), 3);
        assert_eq!(spec.should_trigger_prompts[1].confidence, Confidence::Medium);
        assert_eq!(spec.should_trigger_prompts[0].confidence, Confidence::Unspecified);
    }

    #[test]
    fn test_spec_requires_skill_and_prompts() {
        assert!(TriggerSpec::from_yaml_str("should_trigger_prompts:\n  - prompt: x\n").is_err());
        assert!(TriggerSpec::from_yaml_str("skill: s\n").is_err());
    }

    #[test]
    fn test_unknown_confidence_rejected() {
        let yaml = "skill: s\nshould_trigger_prompts:\n  - prompt: x\n    confidence: low\n";
        assert!(TriggerSpec::from_yaml_str(yaml).is_err());
    }
}
