//! Rule Resolver
//!
//! Assembles the ordered set of rules that apply to one request: global,
//! then endpoint, then tier, then IP, then dynamic penalty rules. Key
//! placeholders are substituted from request fields; two rules resolving to
//! the same counter key are evaluated once (first in order wins).

use std::collections::HashSet;

use crate::application::config::AdmissionConfig;
use crate::domain::repository::PenaltyFactor;
use crate::domain::request::AdmissionRequest;
use crate::domain::rule::{Algorithm, RateLimitRule, RuleScope, RuleSet};

/// Name given to the resolver-generated penalty rule
pub const PENALTY_RULE_NAME: &str = "dynamic-penalty";

/// A rule paired with its resolved counter key
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRule {
    pub rule: RateLimitRule,
    pub counter_key: String,
}

/// Substitute `{identity}`, `{ip}`, `{endpoint}` and `{tier}` placeholders
///
/// Missing fields fall back to their sentinels: the identity degrades to the
/// IP, the tier to `default`.
pub fn substitute_key(pattern: &str, request: &AdmissionRequest) -> String {
    pattern
        .replace("{identity}", &request.identity())
        .replace("{ip}", &request.ip.to_string())
        .replace("{endpoint}", &request.endpoint)
        .replace("{tier}", request.tier_or_default())
}

/// Resolve the ordered, deduplicated rule list for one request
pub fn resolve(
    rule_set: &RuleSet,
    request: &AdmissionRequest,
    penalty: Option<&PenaltyFactor>,
    config: &AdmissionConfig,
) -> Vec<ResolvedRule> {
    let mut applicable: Vec<&RateLimitRule> = rule_set
        .rules
        .iter()
        .filter(|rule| rule.scope.matches(request))
        .collect();
    // Stable sort keeps configuration order within one scope
    applicable.sort_by_key(|rule| rule.scope.order());

    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut resolved: Vec<ResolvedRule> = Vec::with_capacity(applicable.len() + 1);

    for rule in applicable {
        let counter_key = substitute_key(&rule.key_pattern, request);
        if seen_keys.insert(counter_key.clone()) {
            resolved.push(ResolvedRule {
                rule: rule.clone(),
                counter_key,
            });
        }
    }

    if let Some(penalty) = penalty {
        let dynamic = penalty_rule(penalty, config);
        let counter_key = substitute_key(&dynamic.key_pattern, request);
        if seen_keys.insert(counter_key.clone()) {
            resolved.push(ResolvedRule {
                rule: dynamic,
                counter_key,
            });
        }
    }

    resolved
}

/// Turn an active penalty into a stricter temporary rule
///
/// `factor = 0` yields `limit = 0`, a full temporary block.
fn penalty_rule(penalty: &PenaltyFactor, config: &AdmissionConfig) -> RateLimitRule {
    let factor = penalty.factor.clamp(0.0, 1.0);
    let limit = (config.penalty_base_limit as f64 * factor).floor() as u64;
    RateLimitRule {
        name: PENALTY_RULE_NAME.to_string(),
        limit,
        window_secs: config.penalty_window_secs(),
        key_pattern: "penalty:{identity}".to_string(),
        scope: RuleScope::Global,
        algorithm: Algorithm::SlidingWindow,
    }
}
