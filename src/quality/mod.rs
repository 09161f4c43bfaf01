//! Quality Validator (C7) — a weighted quality score computed from run
//! state (spec.md §4.7).

use serde::{Deserialize, Serialize};

/// An optional plan supplying expected step/action counts; absent, a
/// heuristic of 2 is used for both (spec.md §4.7).
#[derive(Debug, Clone, Copy)]
pub struct Plan {
    pub steps: usize,
    pub expected_actions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QualityReport {
    pub overall: f64,
    pub completeness: f64,
    pub coverage: f64,
    pub reliability: f64,
    pub format_valid: f64,
}

/// Minimal slice of `AgentRunState` the validator reads.
pub struct QualityInputs<'a> {
    pub actions_len: usize,
    pub successful_observations: usize,
    pub observations_len: usize,
    pub final_answer: Option<&'a str>,
}

const DEFAULT_EXPECTED: f64 = 2.0;

/// Computes the weighted composite score: `0.30·completeness +
/// 0.30·coverage + 0.25·reliability + 0.15·format_valid`.
pub fn validate(inputs: &QualityInputs, plan: Option<Plan>) -> QualityReport {
    let expected_completeness = plan.map(|p| p.steps as f64).unwrap_or(DEFAULT_EXPECTED);
    let expected_coverage = plan.map(|p| p.expected_actions as f64).unwrap_or(DEFAULT_EXPECTED);

    let completeness = if expected_completeness > 0.0 {
        (inputs.successful_observations as f64 / expected_completeness).min(1.0)
    } else {
        0.0
    };
    let coverage = if expected_coverage > 0.0 {
        (inputs.actions_len as f64 / expected_coverage).min(1.0)
    } else {
        0.0
    };
    let reliability = if inputs.observations_len > 0 {
        inputs.successful_observations as f64 / inputs.observations_len as f64
    } else {
        0.0
    };
    let format_valid = score_format(inputs.final_answer);

    let overall = 0.30 * completeness + 0.30 * coverage + 0.25 * reliability + 0.15 * format_valid;
    QualityReport { overall, completeness, coverage, reliability, format_valid }
}

fn score_format(final_answer: Option<&str>) -> f64 {
    let Some(answer) = final_answer else {
        return 0.0;
    };
    let mut score = 0.0;
    if answer.len() > 20 {
        score += 0.4;
    }
    if answer.len() > 100 || !answer.to_lowercase().contains("error") {
        score += 0.3;
    }
    let has_list_marker = ["1.", "2.", "-", "*"].iter().any(|m| answer.contains(m));
    if answer.contains('\n') || has_list_marker {
        score += 0.3;
    }
    score
}

/// A run is completable iff `overall >= quality_threshold` (default 0.75).
pub fn is_completable(report: &QualityReport, quality_threshold: f64) -> bool {
    report.overall >= quality_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_observations_scores_zero_reliability() {
        let inputs = QualityInputs { actions_len: 0, successful_observations: 0, observations_len: 0, final_answer: None };
        let report = validate(&inputs, None);
        assert_eq!(report.reliability, 0.0);
        assert_eq!(report.format_valid, 0.0);
    }

    #[test]
    fn full_success_with_good_final_answer_passes_threshold() {
        let answer = "Here is your answer:\n1. First point\n2. Second point, with plenty of helpful detail included.";
        let inputs = QualityInputs { actions_len: 2, successful_observations: 2, observations_len: 2, final_answer: Some(answer) };
        let report = validate(&inputs, None);
        assert!(report.overall >= 0.75, "overall={}", report.overall);
        assert!(is_completable(&report, 0.75));
    }

    #[test]
    fn plan_overrides_default_expectations() {
        let inputs = QualityInputs { actions_len: 1, successful_observations: 1, observations_len: 1, final_answer: None };
        let report = validate(&inputs, Some(Plan { steps: 4, expected_actions: 4 }));
        assert!((report.completeness - 0.25).abs() < 1e-9);
        assert!((report.coverage - 0.25).abs() < 1e-9);
    }

    #[test]
    fn format_score_penalizes_bare_error_message() {
        let score = score_format(Some("error"));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn format_score_rewards_long_non_error_text() {
        let score = score_format(Some(&"x".repeat(150)));
        assert!((score - 0.7).abs() < 1e-9);
    }
}
