//! Coordinated Attack Detector
//!
//! The only detector with global (cross-identity) state: many distinct IPs
//! converging on one endpoint in a short burst, the shape of a distributed
//! attack no per-identity counter can see.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;

use admission::domain::request::AdmissionRequest;

use crate::domain::entities::DetectionResult;
use crate::error::AbuseResult;

use super::{Detector, History};

const WINDOW_MS: i64 = 30_000;
const MAX_KEYS: usize = 5_000;
const MAX_PER_KEY: usize = 2_048;

pub struct CoordinatedAttackDetector {
    /// Distinct source IPs on one endpoint that start scoring
    distinct_threshold: usize,
    history: Mutex<History<IpAddr>>,
}

impl CoordinatedAttackDetector {
    pub fn new() -> Self {
        Self::with_threshold(20)
    }

    pub fn with_threshold(distinct_threshold: usize) -> Self {
        Self {
            distinct_threshold: distinct_threshold.max(2),
            history: Mutex::new(History::new(WINDOW_MS, MAX_KEYS, MAX_PER_KEY)),
        }
    }
}

impl Default for CoordinatedAttackDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for CoordinatedAttackDetector {
    fn name(&self) -> &'static str {
        "coordinated_attack"
    }

    fn evaluate(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseResult<DetectionResult> {
        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let entries = history.observe(&request.endpoint, now_ms, request.ip);
        let distinct: HashSet<&IpAddr> = entries.iter().map(|(_, ip)| ip).collect();
        let distinct = distinct.len();
        drop(history);

        if distinct < self.distinct_threshold {
            return Ok(DetectionResult::clean(self.name()));
        }

        let risk = (5.0 + distinct as f64 / self.distinct_threshold as f64 * 2.0).min(9.0);
        Ok(DetectionResult::new(
            self.name(),
            risk,
            ["coordinated_burst".to_string()],
            0.7,
            format!(
                "{distinct} distinct IPs on {} in {}s",
                request.endpoint,
                WINDOW_MS / 1_000
            ),
        ))
    }
}
