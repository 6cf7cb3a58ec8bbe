//! Abuse Detection Engine
//!
//! Runs every registered detector concurrently with a per-detector timeout.
//! A failing or slow detector contributes a zero-risk annotated result and
//! never aborts its siblings; combination is pure (max risk, union of
//! indicators).

use std::sync::Arc;

use admission::domain::request::AdmissionRequest;

use crate::application::config::AbuseConfig;
use crate::application::detectors::{
    CoordinatedAttackDetector, CredentialStuffingDetector, Detector, EnumerationDetector,
    GeoImpossibilityDetector, RateSpikeDetector, ScrapingDetector, UserAgentAnomalyDetector,
};
use crate::domain::entities::{AbuseAnalysis, DetectionResult};
use crate::domain::services;

pub struct AbuseDetectionEngine {
    detectors: Vec<Arc<dyn Detector>>,
    config: Arc<AbuseConfig>,
}

impl AbuseDetectionEngine {
    pub fn new(detectors: Vec<Arc<dyn Detector>>, config: Arc<AbuseConfig>) -> Self {
        Self { detectors, config }
    }

    /// The full production detector set
    pub fn with_default_detectors(config: Arc<AbuseConfig>) -> Self {
        let detectors: Vec<Arc<dyn Detector>> = vec![
            Arc::new(RateSpikeDetector::new()),
            Arc::new(GeoImpossibilityDetector::new()),
            Arc::new(UserAgentAnomalyDetector::new()),
            Arc::new(EnumerationDetector::new()),
            Arc::new(CredentialStuffingDetector::new()),
            Arc::new(ScrapingDetector::new()),
            Arc::new(CoordinatedAttackDetector::new()),
        ];
        Self::new(detectors, config)
    }

    /// Score one request across all detectors
    pub async fn analyze(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseAnalysis {
        let mut handles = Vec::with_capacity(self.detectors.len());
        for detector in &self.detectors {
            let detector = detector.clone();
            let request = request.clone();
            let name = detector.name();
            let handle = tokio::spawn(async move { detector.evaluate(&request, now_ms) });
            handles.push((name, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match tokio::time::timeout(self.config.detector_timeout, handle).await {
                Ok(Ok(Ok(result))) => result,
                Ok(Ok(Err(e))) => {
                    tracing::warn!(detector = name, error = %e, "Detector failed");
                    DetectionResult::failed(name, &e.to_string())
                }
                Ok(Err(join_error)) => {
                    tracing::error!(detector = name, error = %join_error, "Detector panicked");
                    DetectionResult::failed(name, "panicked")
                }
                Err(_) => {
                    tracing::warn!(detector = name, "Detector timed out");
                    DetectionResult::failed(name, "timed out")
                }
            };
            results.push(result);
        }

        let analysis = services::combine(results);
        if analysis.risk_score > 0.0 {
            tracing::debug!(
                risk = analysis.risk_score,
                action = %analysis.action,
                indicators = ?analysis.indicators,
                "Abuse analysis scored"
            );
        }
        analysis
    }
}
