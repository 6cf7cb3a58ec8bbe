//! Application Configuration

use std::time::Duration;

/// Abuse application configuration
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Deadline per detector; a slow detector is cut off, not waited for
    pub detector_timeout: Duration,
    /// How long a BLOCK keeps an identity/IP on the deny list
    pub deny_ttl: Duration,
    /// How long a CHALLENGE flag stays active
    pub challenge_ttl: Duration,
    /// How long a RATE_LIMIT penalty stays active
    pub penalty_ttl: Duration,
    /// Limit multiplier applied by a RATE_LIMIT penalty
    pub penalty_factor: f64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            detector_timeout: Duration::from_millis(50),
            deny_ttl: Duration::from_secs(15 * 60),
            challenge_ttl: Duration::from_secs(10 * 60),
            penalty_ttl: Duration::from_secs(5 * 60),
            penalty_factor: 0.5,
        }
    }
}

impl AbuseConfig {
    pub fn deny_ttl_ms(&self) -> i64 {
        self.deny_ttl.as_millis() as i64
    }

    pub fn challenge_ttl_ms(&self) -> i64 {
        self.challenge_ttl.as_millis() as i64
    }

    pub fn penalty_ttl_ms(&self) -> i64 {
        self.penalty_ttl.as_millis() as i64
    }
}
