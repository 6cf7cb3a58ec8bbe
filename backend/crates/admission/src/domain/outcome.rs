//! Admission Decisions and Violations

use std::net::IpAddr;

use kernel::id::ViolationId;

use crate::domain::counter::RuleCheckOutcome;
use crate::domain::request::AdmissionRequest;

/// The result of one admission check, produced fresh per check
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub retry_after_secs: Option<u64>,
    pub rule: Option<String>,
    pub current: u64,
    pub limit: u64,
    pub window_remaining_secs: u64,
    /// Set when the counter store was unreachable and the check failed open
    pub degraded: bool,
}

impl AdmissionDecision {
    /// Aggregate allow; reports the first evaluated rule's counters
    pub fn allowed(rule: Option<String>, current: u64, limit: u64, window_remaining_secs: u64) -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_secs: None,
            rule,
            current,
            limit,
            window_remaining_secs,
            degraded: false,
        }
    }

    /// Rejection by the first violated rule, in resolver order
    pub fn rejected(rule_name: &str, outcome: &RuleCheckOutcome) -> Self {
        Self {
            allowed: false,
            reason: Some(format!(
                "rule '{}' exceeded: {}/{}",
                rule_name, outcome.current, outcome.limit
            )),
            retry_after_secs: outcome.retry_after_secs,
            rule: Some(rule_name.to_string()),
            current: outcome.current,
            limit: outcome.limit,
            window_remaining_secs: outcome.window_remaining_secs,
            degraded: false,
        }
    }

    /// Fail-open allow when the store is unreachable
    pub fn degraded_allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_secs: None,
            rule: None,
            current: 0,
            limit: 0,
            window_remaining_secs: 0,
            degraded: true,
        }
    }
}

/// A recorded rate limit violation, short-lived and write-once
///
/// Carries no raw secrets: the identity, IP and rule name only.
#[derive(Debug, Clone)]
pub struct Violation {
    pub id: ViolationId,
    pub occurred_at_ms: i64,
    pub identity: String,
    pub ip: IpAddr,
    pub endpoint: String,
    pub rule_name: String,
    pub current: u64,
    pub limit: u64,
    pub reason: String,
}

impl Violation {
    pub fn new(
        request: &AdmissionRequest,
        rule_name: &str,
        outcome: &RuleCheckOutcome,
        now_ms: i64,
    ) -> Self {
        Self {
            id: ViolationId::new(),
            occurred_at_ms: now_ms,
            identity: request.identity(),
            ip: request.ip,
            endpoint: request.endpoint.clone(),
            rule_name: rule_name.to_string(),
            current: outcome.current,
            limit: outcome.limit,
            reason: format!("{}/{} in window", outcome.current, outcome.limit),
        }
    }
}
