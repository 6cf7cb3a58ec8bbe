//! Credential Stuffing Detector
//!
//! One IP cycling through many account identities on authentication
//! endpoints is the classic stuffing shape. Tracks per-IP identity breadth
//! on auth paths only.

use std::collections::HashSet;
use std::sync::Mutex;

use admission::domain::request::AdmissionRequest;

use crate::domain::entities::DetectionResult;
use crate::error::AbuseResult;

use super::{Detector, History};

const WINDOW_MS: i64 = 300_000;
const MAX_KEYS: usize = 10_000;
const MAX_PER_KEY: usize = 256;

const AUTH_MARKERS: [&str; 4] = ["/login", "/signin", "/auth", "/token"];

fn is_auth_endpoint(endpoint: &str) -> bool {
    AUTH_MARKERS.iter().any(|marker| endpoint.contains(marker))
}

pub struct CredentialStuffingDetector {
    /// Distinct identities from one IP that start scoring
    distinct_threshold: usize,
    history: Mutex<History<String>>,
}

impl CredentialStuffingDetector {
    pub fn new() -> Self {
        Self::with_threshold(5)
    }

    pub fn with_threshold(distinct_threshold: usize) -> Self {
        Self {
            distinct_threshold: distinct_threshold.max(2),
            history: Mutex::new(History::new(WINDOW_MS, MAX_KEYS, MAX_PER_KEY)),
        }
    }
}

impl Default for CredentialStuffingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for CredentialStuffingDetector {
    fn name(&self) -> &'static str {
        "credential_stuffing"
    }

    fn evaluate(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseResult<DetectionResult> {
        if !is_auth_endpoint(&request.endpoint) {
            return Ok(DetectionResult::clean(self.name()));
        }

        let ip = request.ip.to_string();
        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let entries = history.observe(&ip, now_ms, request.identity());
        let distinct: HashSet<&str> = entries.iter().map(|(_, id)| id.as_str()).collect();
        let distinct = distinct.len();
        drop(history);

        if distinct < self.distinct_threshold {
            return Ok(DetectionResult::clean(self.name()));
        }

        let risk = (4.0 + 0.6 * distinct as f64).min(10.0);
        let mut indicators = vec!["credential_stuffing".to_string()];
        if distinct >= self.distinct_threshold * 2 {
            indicators.push("many_accounts_one_ip".to_string());
        }
        let confidence = if distinct >= self.distinct_threshold * 2 {
            0.85
        } else {
            0.7
        };

        Ok(DetectionResult::new(
            self.name(),
            risk,
            indicators,
            confidence,
            format!("{distinct} identities from one IP on auth endpoints"),
        ))
    }
}
