//! Abuse Detectors
//!
//! Each detector scores one request 0..=10 for a single threat pattern,
//! keeping whatever per-process history it needs. Detectors are independent:
//! a failure or timeout in one never aborts the others, and their state is
//! best-effort per process by design.

mod agent;
mod coordinated;
mod enumeration;
mod geo;
mod rate;
mod scraping;
mod stuffing;

pub use agent::UserAgentAnomalyDetector;
pub use coordinated::CoordinatedAttackDetector;
pub use enumeration::EnumerationDetector;
pub use geo::GeoImpossibilityDetector;
pub use rate::RateSpikeDetector;
pub use scraping::ScrapingDetector;
pub use stuffing::CredentialStuffingDetector;

use std::collections::{HashMap, VecDeque};

use admission::domain::request::AdmissionRequest;

use crate::domain::entities::DetectionResult;
use crate::error::AbuseResult;

/// One threat-pattern scorer
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Observe the request and score it; must be cheap and in-memory
    fn evaluate(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseResult<DetectionResult>;
}

/// Sliding per-key observation history with bounded memory
///
/// Not internally synchronized; detectors wrap it in a mutex.
pub(crate) struct History<T> {
    map: HashMap<String, VecDeque<(i64, T)>>,
    window_ms: i64,
    max_keys: usize,
    max_per_key: usize,
}

impl<T> History<T> {
    pub fn new(window_ms: i64, max_keys: usize, max_per_key: usize) -> Self {
        Self {
            map: HashMap::new(),
            window_ms,
            max_keys: max_keys.max(1),
            max_per_key: max_per_key.max(1),
        }
    }

    /// Record one observation and return the key's pruned history
    pub fn observe(&mut self, key: &str, now_ms: i64, value: T) -> &VecDeque<(i64, T)> {
        if !self.map.contains_key(key) && self.map.len() >= self.max_keys {
            self.purge(now_ms);
        }
        let entries = self.map.entry(key.to_string()).or_default();
        let cutoff = now_ms - self.window_ms;
        while entries.front().is_some_and(|(t, _)| *t < cutoff) {
            entries.pop_front();
        }
        entries.push_back((now_ms, value));
        while entries.len() > self.max_per_key {
            entries.pop_front();
        }
        entries
    }

    /// Drop keys whose newest entry left the window
    fn purge(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms;
        self.map
            .retain(|_, entries| entries.back().is_some_and(|(t, _)| *t >= cutoff));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_prunes_window_and_caps_entries() {
        let mut history: History<u32> = History::new(10_000, 100, 3);
        history.observe("k", 0, 1);
        history.observe("k", 5_000, 2);

        // First entry fell out of the window
        let entries = history.observe("k", 12_000, 3);
        assert_eq!(entries.len(), 2);

        // Per-key cap drops the oldest
        history.observe("k", 12_100, 4);
        let entries = history.observe("k", 12_200, 5);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.front().unwrap().1, 3);
    }

    #[test]
    fn test_history_purges_stale_keys_at_capacity() {
        let mut history: History<()> = History::new(1_000, 2, 10);
        history.observe("a", 0, ());
        history.observe("b", 10_000, ());
        // "a" is stale; inserting "c" at capacity purges it
        history.observe("c", 10_500, ());
        assert!(history.map.contains_key("b"));
        assert!(history.map.contains_key("c"));
        assert!(!history.map.contains_key("a"));
    }
}
