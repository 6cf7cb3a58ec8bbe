//! Reload Rules Use Case
//!
//! Validates an incoming rule list and atomically swaps the active set.
//! A malformed set is rejected and the old rules keep serving.

use std::sync::Arc;

use crate::domain::rule::{RateLimitRule, RuleSet, RuleSetHandle};
use crate::error::AdmissionResult;

/// Output DTO for reload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub version: u64,
    pub rule_count: usize,
}

/// Reload Rules Use Case
pub struct ReloadRulesUseCase {
    rules: Arc<RuleSetHandle>,
}

impl ReloadRulesUseCase {
    pub fn new(rules: Arc<RuleSetHandle>) -> Self {
        Self { rules }
    }

    pub fn execute(&self, incoming: Vec<RateLimitRule>) -> AdmissionResult<ReloadOutcome> {
        let set = RuleSet::new(incoming)?;
        let rule_count = set.len();
        let version = self.rules.swap(set);

        tracing::info!(version, rules = rule_count, "Rule set reloaded");

        Ok(ReloadOutcome {
            version,
            rule_count,
        })
    }
}
