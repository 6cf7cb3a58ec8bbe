//! Application Configuration
//!
//! Tunable knobs for the admission layer. The quoted defaults are targets,
//! not contracts; everything here is injected so tests can tighten them.

use std::time::Duration;

/// Admission application configuration
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Behavior profile cache TTL
    pub profile_cache_ttl: Duration,
    /// Behavior profile cache capacity
    pub profile_cache_max_entries: usize,
    /// How far back activity history feeds a profile
    pub profile_history_window: Duration,
    /// Max activity rows read per recomputation
    pub profile_history_limit: u32,
    /// How far back security incidents count against trust
    pub incident_window: Duration,
    /// Violations older than this are eligible for cleanup
    pub violation_retention: Duration,
    /// Lower clamp on the combined adaptive multiplier
    pub min_limit_multiplier: f64,
    /// Upper clamp on the combined adaptive multiplier
    pub max_limit_multiplier: f64,
    /// Endpoint prefixes that tighten limits for low-trust identities
    pub sensitive_endpoint_prefixes: Vec<String>,
    /// Base limit a penalty factor scales down
    pub penalty_base_limit: u64,
    /// Window of the dynamic penalty rule
    pub penalty_window: Duration,
    /// Deadline for one counter store transaction before failing open
    pub store_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            profile_cache_ttl: Duration::from_secs(300),
            profile_cache_max_entries: 10_000,
            profile_history_window: Duration::from_secs(3_600),
            profile_history_limit: 500,
            incident_window: Duration::from_secs(30 * 24 * 3_600),
            violation_retention: Duration::from_secs(3_600),
            min_limit_multiplier: 0.25,
            max_limit_multiplier: 2.0,
            sensitive_endpoint_prefixes: vec![
                "/api/auth".to_string(),
                "/api/account".to_string(),
            ],
            penalty_base_limit: 30,
            penalty_window: Duration::from_secs(60),
            store_timeout: Duration::from_millis(250),
        }
    }
}

impl AdmissionConfig {
    pub fn profile_cache_ttl_ms(&self) -> i64 {
        self.profile_cache_ttl.as_millis() as i64
    }

    pub fn profile_history_window_ms(&self) -> i64 {
        self.profile_history_window.as_millis() as i64
    }

    pub fn incident_window_ms(&self) -> i64 {
        self.incident_window.as_millis() as i64
    }

    pub fn violation_retention_ms(&self) -> i64 {
        self.violation_retention.as_millis() as i64
    }

    pub fn penalty_window_secs(&self) -> u64 {
        self.penalty_window.as_secs().max(1)
    }
}
