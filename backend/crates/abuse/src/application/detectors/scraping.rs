//! Scraping Detector
//!
//! Sustained read volume across a broad endpoint surface. Individually each
//! request is fine; the shape over minutes is what gives scraping away.

use std::collections::HashSet;
use std::sync::Mutex;

use admission::domain::request::AdmissionRequest;

use crate::domain::entities::DetectionResult;
use crate::error::AbuseResult;

use super::{Detector, History};

const WINDOW_MS: i64 = 300_000;
const MAX_KEYS: usize = 10_000;
const MAX_PER_KEY: usize = 1_024;

pub struct ScrapingDetector {
    /// Requests in the window that start scoring
    volume_threshold: usize,
    /// Distinct endpoints that count as a broad sweep
    breadth_threshold: usize,
    history: Mutex<History<String>>,
}

impl ScrapingDetector {
    pub fn new() -> Self {
        Self::with_thresholds(100, 20)
    }

    pub fn with_thresholds(volume_threshold: usize, breadth_threshold: usize) -> Self {
        Self {
            volume_threshold: volume_threshold.max(2),
            breadth_threshold: breadth_threshold.max(2),
            history: Mutex::new(History::new(WINDOW_MS, MAX_KEYS, MAX_PER_KEY)),
        }
    }
}

impl Default for ScrapingDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ScrapingDetector {
    fn name(&self) -> &'static str {
        "scraping"
    }

    fn evaluate(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseResult<DetectionResult> {
        // Scraping is a read pattern
        if request.method != "GET" {
            return Ok(DetectionResult::clean(self.name()));
        }

        let identity = request.identity();
        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let entries = history.observe(&identity, now_ms, request.endpoint.clone());
        let volume = entries.len();
        let breadth: HashSet<&str> = entries.iter().map(|(_, e)| e.as_str()).collect();
        let breadth = breadth.len();
        drop(history);

        if volume < self.volume_threshold {
            return Ok(DetectionResult::clean(self.name()));
        }

        let volume_factor = (volume as f64 / self.volume_threshold as f64).min(2.0);
        let breadth_factor = (breadth as f64 / self.breadth_threshold as f64).min(2.0);
        let risk = (3.0 + volume_factor + breadth_factor).min(7.0);

        let mut indicators = vec!["scraping_pattern".to_string()];
        if breadth >= self.breadth_threshold {
            indicators.push("broad_surface_sweep".to_string());
        }

        Ok(DetectionResult::new(
            self.name(),
            risk,
            indicators,
            0.6,
            format!("{volume} reads over {breadth} endpoints"),
        ))
    }
}
