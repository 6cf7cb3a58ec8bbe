//! Repository Traits
//!
//! Ports between the admission core and its collaborators: the shared
//! counter store, persistence for violations/activity/accounts, the
//! enforcement layer written by the abuse responder, and the asynchronous
//! abuse analysis sink. Implementations live in the infrastructure layer
//! (and, for enforcement, in the abuse crate).

use crate::domain::counter::RuleCheckOutcome;
use crate::domain::outcome::Violation;
use crate::domain::profile::{AccountInfo, RequestActivity};
use crate::domain::request::AdmissionRequest;
use crate::domain::rule::EffectiveRule;
use crate::error::AdmissionResult;

/// Shared counter store
///
/// The whole read-modify-write for one key MUST be atomic end-to-end:
/// two concurrent checks on the same key are serialized by the store, never
/// interleaved between read and write.
#[trait_variant::make(CounterStore: Send)]
pub trait LocalCounterStore {
    async fn check_and_update(
        &self,
        key: &str,
        rule: &EffectiveRule,
        now_ms: i64,
    ) -> AdmissionResult<RuleCheckOutcome>;
}

/// Violation persistence, consumed by aggregation and profile feedback
#[trait_variant::make(ViolationRepository: Send)]
pub trait LocalViolationRepository {
    async fn record(&self, violation: &Violation) -> AdmissionResult<()>;

    /// Violations for one identity since `since_ms`
    async fn recent_count(&self, identity: &str, since_ms: i64) -> AdmissionResult<u64>;
}

/// Request activity history feeding the behavior analyzer
#[trait_variant::make(ActivityRepository: Send)]
pub trait LocalActivityRepository {
    async fn record(&self, activity: &RequestActivity) -> AdmissionResult<()>;

    /// Most recent activity for one identity since `since_ms`, oldest first
    async fn recent(
        &self,
        identity: &str,
        since_ms: i64,
        limit: u32,
    ) -> AdmissionResult<Vec<RequestActivity>>;
}

/// Account metadata and security incident history
#[trait_variant::make(AccountRepository: Send)]
pub trait LocalAccountRepository {
    async fn account_info(&self, identity: &str) -> AdmissionResult<Option<AccountInfo>>;

    async fn incident_count(&self, identity: &str, since_ms: i64) -> AdmissionResult<u64>;
}

/// Active temporary penalty, resolved into a dynamic rule
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyFactor {
    /// Multiplier in [0, 1] applied to the penalty base limit
    pub factor: f64,
    pub reason: String,
    pub expires_at_ms: i64,
}

/// Enforcement state written by the abuse responder, read at the boundary
#[trait_variant::make(EnforcementProbe: Send)]
pub trait LocalEnforcementProbe {
    /// Deny-list reason for this identity or IP, if any
    async fn denied_reason(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<Option<String>>;

    async fn challenge_required(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<bool>;

    /// Strictest active penalty for this identity or IP, if any
    async fn active_penalty(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<Option<PenaltyFactor>>;
}

/// Post-decision hook feeding the abuse analysis layer
///
/// Observation is spawned after the admission decision has been returned;
/// it never blocks or fails the decision path.
#[trait_variant::make(AbuseSink: Send)]
pub trait LocalAbuseSink {
    async fn observe(&self, request: AdmissionRequest);
}

/// Sink that drops every observation (tests, abuse layer disabled)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAbuseSink;

impl AbuseSink for NoopAbuseSink {
    async fn observe(&self, _request: AdmissionRequest) {}
}
