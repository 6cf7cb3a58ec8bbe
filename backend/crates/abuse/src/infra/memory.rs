//! In-Memory Enforcement Store
//!
//! Test implementation covering both the writer side and the admission
//! probe side, so responder-to-boundary round trips can be exercised
//! without a database. Clones share state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use admission::domain::repository::{EnforcementProbe, PenaltyFactor};
use admission::error::AdmissionResult;

use crate::domain::repository::{EnforcementRepository, identity_key, ip_key};
use crate::error::AbuseResult;

#[derive(Default)]
struct Inner {
    deny: Mutex<HashMap<String, (String, i64)>>,
    challenge: Mutex<HashMap<String, (String, i64)>>,
    penalties: Mutex<HashMap<String, (f64, String, i64)>>,
}

#[derive(Clone, Default)]
pub struct MemoryEnforcementStore {
    inner: Arc<Inner>,
}

impl MemoryEnforcementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_entries(&self) -> Vec<(String, String)> {
        self.inner
            .deny
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(key, (reason, _))| (key.clone(), reason.clone()))
            .collect()
    }

    pub fn penalty_for(&self, key: &str) -> Option<f64> {
        self.inner
            .penalties
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .map(|(factor, _, _)| *factor)
    }
}

impl EnforcementRepository for MemoryEnforcementStore {
    async fn deny(&self, key: &str, reason: &str, expires_at_ms: i64) -> AbuseResult<()> {
        self.inner
            .deny
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), (reason.to_string(), expires_at_ms));
        Ok(())
    }

    async fn require_challenge(
        &self,
        key: &str,
        reason: &str,
        expires_at_ms: i64,
    ) -> AbuseResult<()> {
        self.inner
            .challenge
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), (reason.to_string(), expires_at_ms));
        Ok(())
    }

    async fn apply_penalty(
        &self,
        key: &str,
        factor: f64,
        reason: &str,
        expires_at_ms: i64,
    ) -> AbuseResult<()> {
        self.inner
            .penalties
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                key.to_string(),
                (factor.clamp(0.0, 1.0), reason.to_string(), expires_at_ms),
            );
        Ok(())
    }
}

impl EnforcementProbe for MemoryEnforcementStore {
    async fn denied_reason(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<Option<String>> {
        let deny = self.inner.deny.lock().unwrap_or_else(|p| p.into_inner());
        for key in [identity_key(identity), ip_key(ip)] {
            if let Some((reason, expires_at_ms)) = deny.get(&key) {
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
        Ok([identity_key(identity), ip_key(ip)].iter().any(|key| {
            challenge
                .get(key)
                .is_some_and(|(_, expires_at_ms)| *expires_at_ms > now_ms)
        }))
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
        for key in [identity_key(identity), ip_key(ip)] {
            if let Some((factor, reason, expires_at_ms)) = penalties.get(&key) {
                if *expires_at_ms > now_ms
                    && strictest.as_ref().is_none_or(|s| *factor < s.factor)
                {
                    strictest = Some(PenaltyFactor {
                        factor: *factor,
                        reason: reason.clone(),
                        expires_at_ms: *expires_at_ms,
                    });
                }
            }
        }
        Ok(strictest)
    }
}
