//! Enumeration Detector
//!
//! Watches for one identity probing many distinct resource IDs under the
//! same path prefix, the access pattern of ID scanning. Sequential numeric
//! IDs raise the score further.

use std::collections::HashSet;
use std::sync::Mutex;

use admission::domain::request::AdmissionRequest;

use crate::domain::entities::DetectionResult;
use crate::error::AbuseResult;

use super::{Detector, History};

const WINDOW_MS: i64 = 300_000;
const MAX_KEYS: usize = 10_000;
const MAX_PER_KEY: usize = 256;

/// Run of consecutive numeric IDs that counts as sequential probing
const SEQUENTIAL_RUN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProbedId {
    prefix: String,
    /// Numeric ID when the segment is an integer, else the raw segment
    numeric: Option<i64>,
    raw: String,
}

/// Split `/api/users/12345` into a prefix and an ID-looking last segment
fn split_resource_id(endpoint: &str) -> Option<ProbedId> {
    let (prefix, last) = endpoint.rsplit_once('/')?;
    if last.is_empty() || prefix.is_empty() {
        return None;
    }
    if let Ok(numeric) = last.parse::<i64>() {
        return Some(ProbedId {
            prefix: prefix.to_string(),
            numeric: Some(numeric),
            raw: last.to_string(),
        });
    }
    // UUID-shaped segments count as probed IDs too
    let uuid_shaped = last.len() == 36 && last.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    if uuid_shaped {
        return Some(ProbedId {
            prefix: prefix.to_string(),
            numeric: None,
            raw: last.to_string(),
        });
    }
    None
}

pub struct EnumerationDetector {
    /// Distinct IDs under one prefix that start scoring
    distinct_threshold: usize,
    history: Mutex<History<ProbedId>>,
}

impl EnumerationDetector {
    pub fn new() -> Self {
        Self::with_threshold(15)
    }

    pub fn with_threshold(distinct_threshold: usize) -> Self {
        Self {
            distinct_threshold: distinct_threshold.max(2),
            history: Mutex::new(History::new(WINDOW_MS, MAX_KEYS, MAX_PER_KEY)),
        }
    }
}

impl Default for EnumerationDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for EnumerationDetector {
    fn name(&self) -> &'static str {
        "enumeration"
    }

    fn evaluate(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseResult<DetectionResult> {
        let Some(probed) = split_resource_id(&request.endpoint) else {
            return Ok(DetectionResult::clean(self.name()));
        };

        let identity = request.identity();
        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let entries = history.observe(&identity, now_ms, probed.clone());

        let same_prefix: Vec<&ProbedId> = entries
            .iter()
            .map(|(_, id)| id)
            .filter(|id| id.prefix == probed.prefix)
            .collect();
        let distinct: HashSet<&str> = same_prefix.iter().map(|id| id.raw.as_str()).collect();
        let distinct = distinct.len();

        // Longest run of +1 steps over the numeric IDs in arrival order
        let numeric: Vec<i64> = same_prefix.iter().filter_map(|id| id.numeric).collect();
        let mut longest_run = 1usize;
        let mut run = 1usize;
        for pair in numeric.windows(2) {
            if pair[1] == pair[0] + 1 {
                run += 1;
                longest_run = longest_run.max(run);
            } else {
                run = 1;
            }
        }
        drop(history);

        let mut risk = 0.0_f64;
        let mut indicators = Vec::new();
        if distinct >= self.distinct_threshold {
            risk = (4.0 + 4.0 * distinct as f64 / self.distinct_threshold as f64).min(8.0);
            indicators.push("resource_enumeration".to_string());
        }
        if longest_run >= SEQUENTIAL_RUN {
            risk = (risk.max(4.0) + 2.0).min(10.0);
            indicators.push("sequential_id_probing".to_string());
        }

        Ok(DetectionResult::new(
            self.name(),
            risk,
            indicators,
            if risk > 0.0 { 0.75 } else { 0.0 },
            format!("{distinct} distinct ids under '{}'", probed.prefix),
        ))
    }
}
