//! Metrics Recorder
//!
//! In-process counters for observability. Per-process and best-effort by
//! design; the shared store is reserved for counter state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

const TOP_N: usize = 5;

/// One (name, count) aggregation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountEntry {
    pub name: String,
    pub count: u64,
}

/// Pollable snapshot of the recorder
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub degraded_checks: u64,
    pub block_rate: f64,
    pub average_check_time_ms: f64,
    pub top_violated_rules: Vec<CountEntry>,
    pub top_violating_users: Vec<CountEntry>,
}

/// Decision recorder shared across the admission layer
#[derive(Debug, Default)]
pub struct Metrics {
    total: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    degraded: AtomicU64,
    check_time_us_total: AtomicU64,
    violated_rules: Mutex<HashMap<String, u64>>,
    violating_identities: Mutex<HashMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allowed(&self, elapsed_us: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.allowed.fetch_add(1, Ordering::Relaxed);
        self.check_time_us_total.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub fn record_blocked(&self, rule_name: &str, identity: &str, elapsed_us: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.blocked.fetch_add(1, Ordering::Relaxed);
        self.check_time_us_total.fetch_add(elapsed_us, Ordering::Relaxed);

        let mut rules = self.violated_rules.lock().unwrap_or_else(|p| p.into_inner());
        *rules.entry(rule_name.to_string()).or_insert(0) += 1;
        drop(rules);

        let mut identities = self
            .violating_identities
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        *identities.entry(identity.to_string()).or_insert(0) += 1;
    }

    /// A check that failed open because the store was unreachable
    pub fn record_degraded(&self, elapsed_us: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.allowed.fetch_add(1, Ordering::Relaxed);
        self.degraded.fetch_add(1, Ordering::Relaxed);
        self.check_time_us_total.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let allowed = self.allowed.load(Ordering::Relaxed);
        let blocked = self.blocked.load(Ordering::Relaxed);
        let degraded = self.degraded.load(Ordering::Relaxed);
        let check_time_us = self.check_time_us_total.load(Ordering::Relaxed);

        let block_rate = if total == 0 {
            0.0
        } else {
            blocked as f64 / total as f64
        };
        let average_check_time_ms = if total == 0 {
            0.0
        } else {
            check_time_us as f64 / total as f64 / 1_000.0
        };

        MetricsSnapshot {
            total_requests: total,
            allowed_requests: allowed,
            blocked_requests: blocked,
            degraded_checks: degraded,
            block_rate,
            average_check_time_ms,
            top_violated_rules: top_entries(&self.violated_rules),
            top_violating_users: top_entries(&self.violating_identities),
        }
    }
}

fn top_entries(map: &Mutex<HashMap<String, u64>>) -> Vec<CountEntry> {
    let map = map.lock().unwrap_or_else(|p| p.into_inner());
    let mut entries: Vec<CountEntry> = map
        .iter()
        .map(|(name, &count)| CountEntry {
            name: name.clone(),
            count,
        })
        .collect();
    // Count desc, then name for a deterministic order
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(TOP_N);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rates() {
        let metrics = Metrics::new();
        metrics.record_allowed(1_000);
        metrics.record_allowed(3_000);
        metrics.record_blocked("global", "user-1", 2_000);
        metrics.record_degraded(2_000);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.allowed_requests, 3);
        assert_eq!(snap.blocked_requests, 1);
        assert_eq!(snap.degraded_checks, 1);
        assert!((snap.block_rate - 0.25).abs() < 1e-9);
        assert!((snap.average_check_time_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_lists_are_bounded_and_sorted() {
        let metrics = Metrics::new();
        for i in 0..10 {
            let rule = format!("rule-{i}");
            for _ in 0..=i {
                metrics.record_blocked(&rule, "user", 0);
            }
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.top_violated_rules.len(), 5);
        assert_eq!(snap.top_violated_rules[0].name, "rule-9");
        assert_eq!(snap.top_violated_rules[0].count, 10);
    }
}
