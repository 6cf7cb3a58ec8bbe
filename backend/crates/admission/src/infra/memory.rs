//! In-Memory Repository Implementations
//!
//! Single-process implementations for tests and development. The counter
//! map mutex covers the whole read-modify-write, matching the atomicity the
//! Postgres row lock provides.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::counter::{self, CounterState, RuleCheckOutcome};
use crate::domain::outcome::Violation;
use crate::domain::profile::{AccountInfo, RequestActivity};
use crate::domain::repository::{
    AccountRepository, ActivityRepository, CounterStore, EnforcementProbe, PenaltyFactor,
    ViolationRepository,
};
use crate::domain::rule::EffectiveRule;
use crate::error::{AdmissionError, AdmissionResult};

#[derive(Default)]
struct StoreInner {
    counters: Mutex<HashMap<String, (CounterState, i64)>>,
    violations: Mutex<Vec<Violation>>,
    activity: Mutex<Vec<RequestActivity>>,
    accounts: Mutex<HashMap<String, AccountInfo>>,
    incidents: Mutex<Vec<(String, i64)>>,
    unavailable: AtomicBool,
}

/// In-memory store; clones share state
#[derive(Clone, Default)]
pub struct MemoryAdmissionStore {
    inner: Arc<StoreInner>,
}

impl MemoryAdmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage (drives the fail-open path in tests)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn upsert_account(&self, identity: &str, info: AccountInfo) {
        self.inner
            .accounts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(identity.to_string(), info);
    }

    pub fn add_incident(&self, identity: &str, occurred_at_ms: i64) {
        self.inner
            .incidents
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((identity.to_string(), occurred_at_ms));
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.inner
            .violations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn counter_state(&self, key: &str) -> Option<CounterState> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .map(|(state, _)| state.clone())
    }
}

impl CounterStore for MemoryAdmissionStore {
    async fn check_and_update(
        &self,
        key: &str,
        rule: &EffectiveRule,
        now_ms: i64,
    ) -> AdmissionResult<RuleCheckOutcome> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(AdmissionError::StoreUnavailable(
                "simulated outage".to_string(),
            ));
        }

        // Single lock over read-compute-write keeps the check atomic per map
        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let state = counters
            .get(key)
            .filter(|(_, expires_at_ms)| *expires_at_ms > now_ms)
            .map(|(state, _)| state.clone());

        let (new_state, outcome) = counter::check(state, rule, now_ms);
        counters.insert(
            key.to_string(),
            (new_state, counter::expiry_for(rule, now_ms)),
        );

        Ok(outcome)
    }
}

impl ViolationRepository for MemoryAdmissionStore {
    async fn record(&self, violation: &Violation) -> AdmissionResult<()> {
        self.inner
            .violations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(violation.clone());
        Ok(())
    }

    async fn recent_count(&self, identity: &str, since_ms: i64) -> AdmissionResult<u64> {
        let violations = self
            .inner
            .violations
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        Ok(violations
            .iter()
            .filter(|v| v.identity == identity && v.occurred_at_ms >= since_ms)
            .count() as u64)
    }
}

impl ActivityRepository for MemoryAdmissionStore {
    async fn record(&self, activity: &RequestActivity) -> AdmissionResult<()> {
        self.inner
            .activity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(activity.clone());
        Ok(())
    }

    async fn recent(
        &self,
        identity: &str,
        since_ms: i64,
        limit: u32,
    ) -> AdmissionResult<Vec<RequestActivity>> {
        let activity = self
            .inner
            .activity
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let mut recent: Vec<RequestActivity> = activity
            .iter()
            .filter(|a| a.identity == identity && a.occurred_at_ms >= since_ms)
            .cloned()
            .collect();
        recent.sort_by_key(|a| a.occurred_at_ms);
        if recent.len() > limit as usize {
            let skip = recent.len() - limit as usize;
            recent.drain(..skip);
        }
        Ok(recent)
    }
}

impl AccountRepository for MemoryAdmissionStore {
    async fn account_info(&self, identity: &str) -> AdmissionResult<Option<AccountInfo>> {
        Ok(self
            .inner
            .accounts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(identity)
            .copied())
    }

    async fn incident_count(&self, identity: &str, since_ms: i64) -> AdmissionResult<u64> {
        let incidents = self
            .inner
            .incidents
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        Ok(incidents
            .iter()
            .filter(|(id, at)| id == identity && *at >= since_ms)
            .count() as u64)
    }
}

#[derive(Default)]
struct ProbeInner {
    deny: Mutex<HashMap<String, (String, i64)>>,
    challenge: Mutex<HashMap<String, i64>>,
    penalties: Mutex<HashMap<String, PenaltyFactor>>,
}

/// In-memory enforcement state for tests; clones share state
#[derive(Clone, Default)]
pub struct MemoryEnforcementProbe {
    inner: Arc<ProbeInner>,
}

impl MemoryEnforcementProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, key: &str, reason: &str, expires_at_ms: i64) {
        self.inner
            .deny
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), (reason.to_string(), expires_at_ms));
    }

    pub fn require_challenge(&self, key: &str, expires_at_ms: i64) {
        self.inner
            .challenge
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), expires_at_ms);
    }

    pub fn penalize(&self, key: &str, penalty: PenaltyFactor) {
        self.inner
            .penalties
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), penalty);
    }
}

impl EnforcementProbe for MemoryEnforcementProbe {
    async fn denied_reason(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<Option<String>> {
        let deny = self.inner.deny.lock().unwrap_or_else(|p| p.into_inner());
        for key in [identity, ip] {
            if let Some((reason, expires_at_ms)) = deny.get(key) {
                if *expires_at_ms > now_ms {
                    return Ok(Some(reason.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn challenge_required(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<bool> {
        let challenge = self
            .inner
            .challenge
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        Ok([identity, ip]
            .iter()
            .any(|key| challenge.get(*key).is_some_and(|&at| at > now_ms)))
    }

    async fn active_penalty(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<Option<PenaltyFactor>> {
        let penalties = self
            .inner
            .penalties
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let mut strictest: Option<PenaltyFactor> = None;
        for key in [identity, ip] {
            if let Some(penalty) = penalties.get(key) {
                if penalty.expires_at_ms > now_ms
                    && strictest
                        .as_ref()
                        .is_none_or(|s| penalty.factor < s.factor)
                {
                    strictest = Some(penalty.clone());
                }
            }
        }
        Ok(strictest)
    }
}
