//! User-Agent Anomaly Detector
//!
//! Three signals, strongest wins: a missing User-Agent, an automation tool
//! announcing itself, and rapid rotation through distinct agents on one
//! identity. Only hashes of agents are retained.

use std::collections::HashSet;
use std::sync::Mutex;

use admission::domain::request::AdmissionRequest;
use platform::crypto::sha256;

use crate::domain::entities::DetectionResult;
use crate::error::AbuseResult;

use super::{Detector, History};

const WINDOW_MS: i64 = 600_000;
const MAX_KEYS: usize = 10_000;
const MAX_PER_KEY: usize = 64;

/// Distinct agents within the window that count as rotation
const ROTATION_THRESHOLD: usize = 4;

const AUTOMATION_MARKERS: [&str; 9] = [
    "curl", "wget", "python", "java/", "bot", "spider", "scraper", "headless", "phantom",
];

pub struct UserAgentAnomalyDetector {
    history: Mutex<History<[u8; 32]>>,
}

impl UserAgentAnomalyDetector {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(History::new(WINDOW_MS, MAX_KEYS, MAX_PER_KEY)),
        }
    }
}

impl Default for UserAgentAnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for UserAgentAnomalyDetector {
    fn name(&self) -> &'static str {
        "user_agent_anomaly"
    }

    fn evaluate(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseResult<DetectionResult> {
        let identity = request.identity();

        let Some(user_agent) = request.user_agent.as_deref() else {
            return Ok(DetectionResult::new(
                self.name(),
                3.0,
                ["missing_user_agent".to_string()],
                0.6,
                "no User-Agent header",
            ));
        };

        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let entries = history.observe(&identity, now_ms, sha256(user_agent.as_bytes()));
        let distinct: HashSet<&[u8; 32]> = entries.iter().map(|(_, hash)| hash).collect();
        let distinct = distinct.len();
        drop(history);

        let lowered = user_agent.to_ascii_lowercase();
        let automation = AUTOMATION_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker));

        let mut risk = 0.0_f64;
        let mut confidence = 0.0_f64;
        let mut indicators = Vec::new();

        if automation {
            risk = risk.max(6.0);
            confidence = confidence.max(0.85);
            indicators.push("automation_user_agent".to_string());
        }
        if distinct >= ROTATION_THRESHOLD {
            risk = risk.max(7.5);
            confidence = confidence.max(0.8);
            indicators.push("user_agent_rotation".to_string());
        }

        Ok(DetectionResult::new(
            self.name(),
            risk,
            indicators,
            confidence,
            format!("{distinct} distinct agents in window"),
        ))
    }
}
