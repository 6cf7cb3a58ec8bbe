//! Adaptive Limit Adjustment
//!
//! Combines learned trust, recent behavior, time of day and endpoint
//! sensitivity into one multiplier applied to a rule's base limit (and,
//! proportionally, its bucket size) before the algorithm engine runs.
//! The stored base rule is never mutated.

use chrono::{DateTime, Timelike};

use crate::application::config::AdmissionConfig;
use crate::domain::profile::UserBehaviorProfile;
use crate::domain::rule::{Algorithm, EffectiveRule, RateLimitRule};

/// The individual factors behind one adjustment, kept for logging and tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveModifier {
    pub trust: f64,
    pub behavior: f64,
    pub time_of_day: f64,
    pub endpoint_affinity: f64,
    /// Product of the factors, clamped to the configured band
    pub combined: f64,
}

/// Linear map from trust in [0, 1] to a multiplier in [0.5, 1.5]
fn trust_modifier(trust: f64) -> f64 {
    0.5 + trust.clamp(0.0, 1.0)
}

/// Recent-behavior factor: incidents tighten, established usage loosens
fn behavior_modifier(profile: &UserBehaviorProfile) -> f64 {
    if profile.security_incident_count > 0 {
        0.8
    } else {
        (0.9 + 0.3 * profile.api_usage_score.clamp(0.0, 1.0)).clamp(0.9, 1.2)
    }
}

/// Off-peak hours loosen limits, peak hours tighten them (UTC)
fn time_of_day_modifier(now_ms: i64) -> f64 {
    let hour = DateTime::from_timestamp_millis(now_ms)
        .map(|t| t.hour())
        .unwrap_or(12);
    match hour {
        0..=5 => 1.2,
        9..=17 => 0.9,
        _ => 1.0,
    }
}

/// Sensitive endpoints stay tight for low-trust identities
fn endpoint_affinity_modifier(
    profile: &UserBehaviorProfile,
    trust: f64,
    endpoint: &str,
    config: &AdmissionConfig,
) -> f64 {
    let sensitive = config
        .sensitive_endpoint_prefixes
        .iter()
        .any(|prefix| endpoint.starts_with(prefix.as_str()));
    if sensitive {
        if trust < 0.4 { 0.7 } else { 0.9 }
    } else {
        1.0 + 0.05 * profile.api_usage_score.clamp(0.0, 1.0)
    }
}

/// Compute the combined modifier for one (profile, endpoint, time) triple
pub fn modifier(
    profile: &UserBehaviorProfile,
    endpoint: &str,
    now_ms: i64,
    config: &AdmissionConfig,
) -> AdaptiveModifier {
    let trust_score = profile.trust_score();
    let trust = trust_modifier(trust_score);
    let behavior = behavior_modifier(profile);
    let time_of_day = time_of_day_modifier(now_ms);
    let endpoint_affinity = endpoint_affinity_modifier(profile, trust_score, endpoint, config);
    let combined = (trust * behavior * time_of_day * endpoint_affinity)
        .clamp(config.min_limit_multiplier, config.max_limit_multiplier);
    AdaptiveModifier {
        trust,
        behavior,
        time_of_day,
        endpoint_affinity,
        combined,
    }
}

/// Apply the adaptive multiplier to a rule, yielding the effective rule
///
/// `limit = 0` stays 0: adaptivity never resurrects an always-reject rule.
/// An explicit bucket size scales proportionally with the limit.
pub fn adjust(
    rule: &RateLimitRule,
    profile: &UserBehaviorProfile,
    endpoint: &str,
    now_ms: i64,
    config: &AdmissionConfig,
) -> EffectiveRule {
    let mut effective = EffectiveRule::from_rule(rule);
    if rule.limit == 0 {
        return effective;
    }

    let m = modifier(profile, endpoint, now_ms, config).combined;
    effective.limit = ((rule.limit as f64 * m).floor() as u64).max(1);
    effective.algorithm = match &rule.algorithm {
        Algorithm::TokenBucket {
            bucket_size,
            refill_rate,
        } => Algorithm::TokenBucket {
            bucket_size: bucket_size.map(|b| (b * m).max(1.0)),
            refill_rate: *refill_rate,
        },
        Algorithm::LeakyBucket {
            bucket_size,
            leak_rate,
        } => Algorithm::LeakyBucket {
            bucket_size: bucket_size.map(|b| (b * m).max(1.0)),
            leak_rate: *leak_rate,
        },
        other => other.clone(),
    };
    effective
}
