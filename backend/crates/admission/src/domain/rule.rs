//! Rate Limit Rules
//!
//! Rules are immutable once loaded. A rule set is validated as a whole at
//! load time and swapped atomically; in-flight checks keep the snapshot they
//! started with.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::request::AdmissionRequest;
use crate::error::{AdmissionError, AdmissionResult};

/// Admission algorithm, tagged union over per-variant parameters
///
/// `bucket_size` defaults to `limit`, `refill_rate`/`leak_rate` default to
/// `limit / window_secs` requests per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Algorithm {
    SlidingWindow,
    TokenBucket {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket_size: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refill_rate: Option<f64>,
    },
    LeakyBucket {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket_size: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        leak_rate: Option<f64>,
    },
    FixedWindow,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket { .. } => "token_bucket",
            Algorithm::LeakyBucket { .. } => "leaky_bucket",
            Algorithm::FixedWindow => "fixed_window",
        }
    }
}

/// Which requests a rule applies to
///
/// The resolver evaluates scopes in `order()`: global rules first, so the
/// broadest rule rejects before narrower counters are touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    Endpoint(String),
    Tier(String),
    Ip(String),
}

impl RuleScope {
    pub fn order(&self) -> u8 {
        match self {
            RuleScope::Global => 0,
            RuleScope::Endpoint(_) => 1,
            RuleScope::Tier(_) => 2,
            RuleScope::Ip(_) => 3,
        }
    }

    pub fn matches(&self, request: &AdmissionRequest) -> bool {
        match self {
            RuleScope::Global => true,
            RuleScope::Endpoint(path) => request.endpoint == *path,
            RuleScope::Tier(tier) => request.tier_or_default() == tier,
            RuleScope::Ip(ip) => request.ip.to_string() == *ip,
        }
    }
}

/// A single rate limit rule
///
/// `key_pattern` supports the placeholders `{identity}`, `{ip}`,
/// `{endpoint}` and `{tier}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub name: String,
    pub limit: u64,
    pub window_secs: u64,
    pub key_pattern: String,
    pub scope: RuleScope,
    #[serde(flatten)]
    pub algorithm: Algorithm,
}

const MAX_NAME_LEN: usize = 128;
const MAX_KEY_PATTERN_LEN: usize = 256;

impl RateLimitRule {
    /// Validate a single rule at load time
    ///
    /// `limit = 0` is legal and always rejects; a zero window is not.
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN {
            return Err(AdmissionError::Configuration(format!(
                "rule name must be 1..={MAX_NAME_LEN} chars"
            )));
        }
        if self.window_secs == 0 {
            return Err(AdmissionError::Configuration(format!(
                "rule '{}': window_secs must be positive",
                self.name
            )));
        }
        if self.key_pattern.is_empty() || self.key_pattern.len() > MAX_KEY_PATTERN_LEN {
            return Err(AdmissionError::Configuration(format!(
                "rule '{}': key_pattern must be 1..={MAX_KEY_PATTERN_LEN} chars",
                self.name
            )));
        }
        let check_positive = |label: &str, v: Option<f64>| -> AdmissionResult<()> {
            match v {
                Some(x) if !x.is_finite() || x <= 0.0 => Err(AdmissionError::Configuration(
                    format!("rule '{}': {label} must be a positive number", self.name),
                )),
                _ => Ok(()),
            }
        };
        match &self.algorithm {
            Algorithm::TokenBucket {
                bucket_size,
                refill_rate,
            } => {
                check_positive("bucket_size", *bucket_size)?;
                check_positive("refill_rate", *refill_rate)?;
            }
            Algorithm::LeakyBucket {
                bucket_size,
                leak_rate,
            } => {
                check_positive("bucket_size", *bucket_size)?;
                check_positive("leak_rate", *leak_rate)?;
            }
            Algorithm::SlidingWindow | Algorithm::FixedWindow => {}
        }
        Ok(())
    }
}

/// A validated, immutable set of rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<RateLimitRule>,
}

impl RuleSet {
    /// Build a rule set, rejecting malformed rules and duplicate names
    pub fn new(rules: Vec<RateLimitRule>) -> AdmissionResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !seen.insert(rule.name.as_str()) {
                return Err(AdmissionError::Configuration(format!(
                    "duplicate rule name '{}'",
                    rule.name
                )));
            }
        }
        Ok(Self { rules })
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Atomically swappable handle to the active rule set
///
/// Readers take a cheap `Arc` snapshot; a reload swaps the pointer and bumps
/// the version while old snapshots keep serving in-flight checks.
pub struct RuleSetHandle {
    current: RwLock<Arc<RuleSet>>,
    version: AtomicU64,
}

impl RuleSetHandle {
    pub fn new(set: RuleSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
            version: AtomicU64::new(1),
        }
    }

    /// Snapshot of the active rule set
    pub fn current(&self) -> Arc<RuleSet> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a new (already validated) rule set, returning the new version
    pub fn swap(&self, set: RuleSet) -> u64 {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(set);
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

/// A rule after adaptive adjustment, ready for the algorithm engine
///
/// Derived per check; the stored base rule is never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveRule {
    pub name: String,
    pub algorithm: Algorithm,
    pub limit: u64,
    pub window_ms: i64,
}

impl EffectiveRule {
    pub fn from_rule(rule: &RateLimitRule) -> Self {
        Self {
            name: rule.name.clone(),
            algorithm: rule.algorithm.clone(),
            limit: rule.limit,
            window_ms: (rule.window_secs as i64).saturating_mul(1_000),
        }
    }

    pub fn window_secs(&self) -> u64 {
        (self.window_ms / 1_000).max(1) as u64
    }

    /// Bucket capacity: explicit `bucket_size`, else the limit
    pub fn capacity(&self) -> f64 {
        match &self.algorithm {
            Algorithm::TokenBucket {
                bucket_size: Some(b),
                ..
            }
            | Algorithm::LeakyBucket {
                bucket_size: Some(b),
                ..
            } => *b,
            _ => self.limit as f64,
        }
    }

    /// Token refill rate per second: explicit, else `limit / window`
    pub fn refill_per_sec(&self) -> f64 {
        match &self.algorithm {
            Algorithm::TokenBucket {
                refill_rate: Some(r),
                ..
            } => *r,
            _ => self.limit as f64 / self.window_secs() as f64,
        }
    }

    /// Leak rate per second: explicit, else `limit / window`
    pub fn leak_per_sec(&self) -> f64 {
        match &self.algorithm {
            Algorithm::LeakyBucket {
                leak_rate: Some(r), ..
            } => *r,
            _ => self.limit as f64 / self.window_secs() as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str, algorithm: Algorithm) -> RateLimitRule {
        RateLimitRule {
            name: name.to_string(),
            limit: 10,
            window_secs: 60,
            key_pattern: "test:{identity}".to_string(),
            scope: RuleScope::Global,
            algorithm,
        }
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut r = rule("a", Algorithm::SlidingWindow);
        r.window_secs = 0;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_rates() {
        let r = rule(
            "a",
            Algorithm::TokenBucket {
                bucket_size: Some(-1.0),
                refill_rate: None,
            },
        );
        assert!(r.validate().is_err());

        let r = rule(
            "b",
            Algorithm::LeakyBucket {
                bucket_size: None,
                leak_rate: Some(0.0),
            },
        );
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_rule_set_rejects_duplicate_names() {
        let rules = vec![rule("a", Algorithm::SlidingWindow), rule("a", Algorithm::FixedWindow)];
        assert!(RuleSet::new(rules).is_err());
    }

    #[test]
    fn test_rule_set_handle_swap_bumps_version() {
        let handle = RuleSetHandle::new(RuleSet::empty());
        assert_eq!(handle.version(), 1);
        let old = handle.current();

        let v = handle.swap(RuleSet::new(vec![rule("a", Algorithm::SlidingWindow)]).unwrap());
        assert_eq!(v, 2);
        // Old snapshot is untouched
        assert!(old.is_empty());
        assert_eq!(handle.current().len(), 1);
    }

    #[test]
    fn test_effective_rule_defaults() {
        let e = EffectiveRule::from_rule(&rule("a", Algorithm::SlidingWindow));
        assert_eq!(e.window_ms, 60_000);
        assert_eq!(e.capacity(), 10.0);
        assert!((e.refill_per_sec() - 10.0 / 60.0).abs() < 1e-9);
    }
}
