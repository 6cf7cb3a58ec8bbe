//! Rate Spike Detector
//!
//! Flags identities whose short-window request rate far exceeds the
//! expected ceiling. Complements (does not replace) the rate limiter: this
//! signal feeds enforcement decisions, not admission counters.

use std::sync::Mutex;

use admission::domain::request::AdmissionRequest;

use crate::domain::entities::DetectionResult;
use crate::error::AbuseResult;

use super::{Detector, History};

const WINDOW_MS: i64 = 10_000;
const MAX_KEYS: usize = 10_000;
const MAX_PER_KEY: usize = 512;

pub struct RateSpikeDetector {
    /// Requests per second considered a full-score spike
    spike_rps: f64,
    history: Mutex<History<()>>,
}

impl RateSpikeDetector {
    pub fn new() -> Self {
        Self::with_threshold(10.0)
    }

    pub fn with_threshold(spike_rps: f64) -> Self {
        Self {
            spike_rps: spike_rps.max(0.1),
            history: Mutex::new(History::new(WINDOW_MS, MAX_KEYS, MAX_PER_KEY)),
        }
    }
}

impl Default for RateSpikeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for RateSpikeDetector {
    fn name(&self) -> &'static str {
        "rate_spike"
    }

    fn evaluate(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseResult<DetectionResult> {
        let identity = request.identity();
        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let count = history.observe(&identity, now_ms, ()).len();
        drop(history);

        let window_secs = WINDOW_MS as f64 / 1_000.0;
        let rps = count as f64 / window_secs;
        let risk = (rps / self.spike_rps).min(1.0) * 10.0;

        let mut indicators = Vec::new();
        if risk >= 5.0 {
            indicators.push("rate_spike".to_string());
        }
        if rps >= self.spike_rps * 2.0 {
            indicators.push("sustained_burst".to_string());
        }

        let confidence = (count as f64 / 50.0).min(1.0);
        Ok(DetectionResult::new(
            self.name(),
            risk,
            indicators,
            confidence,
            format!("{count} requests in {window_secs:.0}s ({rps:.1} rps)"),
        ))
    }
}
