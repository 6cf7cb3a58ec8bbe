//! Domain Services
//!
//! Pure combination logic: detector outputs in, one analysis out. Carries
//! no state of its own, so the same inputs always produce the same action.

use std::collections::BTreeSet;

use crate::domain::entities::{AbuseAnalysis, DetectionResult, EnforcementAction};

const BLOCK_RISK: f64 = 9.0;
const ESCALATION_RISK: f64 = 7.0;
const RATE_LIMIT_RISK: f64 = 5.0;
const MONITOR_RISK: f64 = 3.0;

/// Risk level at which a detector counts toward corroboration
const CORROBORATION_RISK: f64 = 6.0;
/// Detectors at or above `CORROBORATION_RISK` needed to escalate to block
const CORROBORATION_COUNT: usize = 2;
const CORROBORATION_CONFIDENCE: f64 = 0.8;

/// Map detector outputs to an enforcement action
///
/// A single risk ≥ 9 blocks outright. Risk ≥ 7 blocks only when at least
/// two detectors corroborate at risk ≥ 6 with high confidence, otherwise it
/// challenges. Below that: stricter limits at ≥ 5, logging at ≥ 3.
pub fn determine_action(results: &[DetectionResult]) -> EnforcementAction {
    let max_risk = results
        .iter()
        .map(|r| r.risk_score)
        .fold(0.0_f64, f64::max);
    let confidence = combined_confidence(results, max_risk);
    let corroborating = results
        .iter()
        .filter(|r| r.risk_score >= CORROBORATION_RISK)
        .count();

    if max_risk >= BLOCK_RISK {
        EnforcementAction::Block
    } else if max_risk >= ESCALATION_RISK {
        if corroborating >= CORROBORATION_COUNT && confidence >= CORROBORATION_CONFIDENCE {
            EnforcementAction::Block
        } else {
            EnforcementAction::Challenge
        }
    } else if max_risk >= RATE_LIMIT_RISK {
        EnforcementAction::RateLimit
    } else if max_risk >= MONITOR_RISK {
        EnforcementAction::Monitor
    } else {
        EnforcementAction::Allow
    }
}

/// Combine detector results: maximum risk, union of indicators
pub fn combine(results: Vec<DetectionResult>) -> AbuseAnalysis {
    let risk_score = results
        .iter()
        .map(|r| r.risk_score)
        .fold(0.0_f64, f64::max);
    let indicators: BTreeSet<String> = results
        .iter()
        .flat_map(|r| r.indicators.iter().cloned())
        .collect();
    let confidence = combined_confidence(&results, risk_score);
    let action = determine_action(&results);

    AbuseAnalysis {
        risk_score,
        indicators,
        confidence,
        action,
        detector_results: results,
    }
}

fn combined_confidence(results: &[DetectionResult], max_risk: f64) -> f64 {
    results
        .iter()
        .filter(|r| (r.risk_score - max_risk).abs() < f64::EPSILON)
        .map(|r| r.confidence)
        .fold(0.0_f64, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(detector: &'static str, risk: f64, confidence: f64) -> DetectionResult {
        DetectionResult::new(detector, risk, [], confidence, "")
    }

    #[test]
    fn test_single_nine_forces_block() {
        let results = vec![
            result("a", 9.0, 0.2),
            result("b", 0.0, 1.0),
            result("c", 1.0, 1.0),
        ];
        assert_eq!(determine_action(&results), EnforcementAction::Block);
    }

    #[test]
    fn test_corroborated_seven_blocks() {
        let results = vec![result("a", 7.5, 0.9), result("b", 6.5, 0.4)];
        assert_eq!(determine_action(&results), EnforcementAction::Block);
    }

    #[test]
    fn test_lone_seven_challenges() {
        let results = vec![result("a", 7.5, 0.9), result("b", 2.0, 0.9)];
        assert_eq!(determine_action(&results), EnforcementAction::Challenge);
    }

    #[test]
    fn test_low_confidence_seven_challenges() {
        let results = vec![result("a", 7.5, 0.5), result("b", 6.5, 0.5)];
        assert_eq!(determine_action(&results), EnforcementAction::Challenge);
    }

    #[test]
    fn test_threshold_ladder() {
        assert_eq!(
            determine_action(&[result("a", 5.5, 0.5)]),
            EnforcementAction::RateLimit
        );
        assert_eq!(
            determine_action(&[result("a", 3.5, 0.5)]),
            EnforcementAction::Monitor
        );
        assert_eq!(
            determine_action(&[result("a", 2.9, 0.9)]),
            EnforcementAction::Allow
        );
        assert_eq!(determine_action(&[]), EnforcementAction::Allow);
    }

    #[test]
    fn test_combine_keeps_max_and_unions_indicators() {
        let a = DetectionResult::new("a", 4.0, ["x".to_string()], 0.5, "");
        let b = DetectionResult::new("b", 8.0, ["y".to_string(), "x".to_string()], 0.9, "");
        let analysis = combine(vec![a, b]);

        assert_eq!(analysis.risk_score, 8.0);
        assert_eq!(analysis.confidence, 0.9);
        assert_eq!(
            analysis.indicators,
            ["x".to_string(), "y".to_string()].into_iter().collect()
        );
        assert_eq!(analysis.action, EnforcementAction::Challenge);
    }

    #[test]
    fn test_scores_are_clamped() {
        let r = DetectionResult::new("a", 42.0, [], 7.0, "");
        assert_eq!(r.risk_score, 10.0);
        assert_eq!(r.confidence, 1.0);

        let r = DetectionResult::new("a", -3.0, [], -1.0, "");
        assert_eq!(r.risk_score, 0.0);
        assert_eq!(r.confidence, 0.0);
    }
}
