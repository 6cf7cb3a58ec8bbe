//! Domain Entities

use std::collections::BTreeSet;

use serde::Serialize;

/// Risk scores live on a 0..=10 scale
pub const MAX_RISK: f64 = 10.0;

/// Enforcement action, ordered from benign to severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnforcementAction {
    Allow,
    Monitor,
    RateLimit,
    Challenge,
    Block,
}

impl EnforcementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementAction::Allow => "ALLOW",
            EnforcementAction::Monitor => "MONITOR",
            EnforcementAction::RateLimit => "RATE_LIMIT",
            EnforcementAction::Challenge => "CHALLENGE",
            EnforcementAction::Block => "BLOCK",
        }
    }
}

impl std::fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detector's verdict for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub detector: &'static str,
    /// Clamped to [0, 10]
    pub risk_score: f64,
    pub indicators: BTreeSet<String>,
    /// Clamped to [0, 1]
    pub confidence: f64,
    pub details: String,
}

impl DetectionResult {
    pub fn new(
        detector: &'static str,
        risk_score: f64,
        indicators: impl IntoIterator<Item = String>,
        confidence: f64,
        details: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            risk_score: risk_score.clamp(0.0, MAX_RISK),
            indicators: indicators.into_iter().collect(),
            confidence: confidence.clamp(0.0, 1.0),
            details: details.into(),
        }
    }

    /// A benign verdict with no signal
    pub fn clean(detector: &'static str) -> Self {
        Self::new(detector, 0.0, [], 0.0, "no signal")
    }

    /// A failed or timed-out detector: zero risk, annotated
    pub fn failed(detector: &'static str, message: &str) -> Self {
        Self::new(
            detector,
            0.0,
            ["detector_error".to_string()],
            0.0,
            format!("detector failed: {message}"),
        )
    }
}

/// Combined analysis over all detectors for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbuseAnalysis {
    /// Maximum risk across detectors; a single strong signal dominates
    pub risk_score: f64,
    /// Union of all detector indicators
    pub indicators: BTreeSet<String>,
    /// Confidence of the highest-risk detector
    pub confidence: f64,
    pub action: EnforcementAction,
    pub detector_results: Vec<DetectionResult>,
}
