//! Behavior Analyzer
//!
//! Builds and caches per-identity behavioral profiles. Recomputation runs
//! outside the admission path: a check consumes whatever is cached (stale
//! included) and triggers a background refresh; anonymous identities get a
//! fixed neutral profile and are never recomputed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use platform::cache::{CacheHit, CacheStats, TtlCache};
use platform::clock::Clock;

use crate::application::config::AdmissionConfig;
use crate::domain::profile::UserBehaviorProfile;
use crate::domain::repository::{AccountRepository, ActivityRepository, ViolationRepository};
use crate::error::AdmissionResult;

/// Activity volume that counts as fully established API usage
const API_USAGE_SATURATION: f64 = 300.0;

/// Per-identity profile cache plus the repositories to rebuild from
pub struct BehaviorAnalyzer<R>
where
    R: ActivityRepository + AccountRepository + ViolationRepository + Send + Sync,
{
    repo: Arc<R>,
    cache: Mutex<TtlCache<String, UserBehaviorProfile>>,
    clock: Arc<dyn Clock>,
    config: Arc<AdmissionConfig>,
}

impl<R> BehaviorAnalyzer<R>
where
    R: ActivityRepository + AccountRepository + ViolationRepository + Send + Sync,
{
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, config: Arc<AdmissionConfig>) -> Self {
        let cache = Mutex::new(TtlCache::new(
            config.profile_cache_ttl_ms(),
            config.profile_cache_max_entries,
        ));
        Self {
            repo,
            cache,
            clock,
            config,
        }
    }

    /// Profile used on the admission path, plus whether a refresh is due
    ///
    /// Never blocks on recomputation: a cold miss serves the neutral profile.
    pub fn profile_for_check(
        &self,
        identity: &str,
        is_authenticated: bool,
    ) -> (UserBehaviorProfile, bool) {
        let now_ms = self.clock.now_ms();
        if !is_authenticated {
            return (UserBehaviorProfile::neutral(identity, now_ms), false);
        }
        match self.cached(identity) {
            Some(CacheHit { value, stale }) => (value, stale),
            None => (UserBehaviorProfile::neutral(identity, now_ms), true),
        }
    }

    pub fn cached(&self, identity: &str) -> Option<CacheHit<UserBehaviorProfile>> {
        let now_ms = self.clock.now_ms();
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(&identity.to_string(), now_ms)
    }

    /// Drop the cached profile, e.g. after a new violation or incident
    pub fn invalidate(&self, identity: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if cache.invalidate(&identity.to_string()) {
            tracing::debug!(identity, "Behavior profile invalidated");
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.stats()
    }

    /// Recompute the profile from recent history and cache it
    pub async fn refresh(&self, identity: &str) -> AdmissionResult<UserBehaviorProfile> {
        let profile = self.compute(identity).await?;
        let now_ms = self.clock.now_ms();
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(identity.to_string(), profile.clone(), now_ms);
        drop(cache);
        tracing::debug!(
            identity,
            trust = profile.trust_score(),
            "Behavior profile refreshed"
        );
        Ok(profile)
    }

    async fn compute(&self, identity: &str) -> AdmissionResult<UserBehaviorProfile> {
        let now_ms = self.clock.now_ms();
        let since_ms = now_ms - self.config.profile_history_window_ms();

        let activity = self
            .repo
            .recent(identity, since_ms, self.config.profile_history_limit)
            .await?;
        let account = self.repo.account_info(identity).await?;
        let incidents = self
            .repo
            .incident_count(identity, now_ms - self.config.incident_window_ms())
            .await?;
        let violations = self.repo.recent_count(identity, since_ms).await?;

        let account_age_secs = account
            .map(|a| ((now_ms - a.created_at_ms) / 1_000).max(0))
            .unwrap_or(0);
        let mfa_enabled = account.map(|a| a.mfa_enabled).unwrap_or(false);

        let timestamps: Vec<i64> = activity.iter().map(|a| a.occurred_at_ms).collect();
        let total = activity.len();
        let successes = activity.iter().filter(|a| a.success).count();

        let raw_success_rate = if total == 0 {
            1.0
        } else {
            successes as f64 / total as f64
        };
        // Recent violations dampen the success factor even when the
        // violating requests themselves fell out of the history window
        let success_rate =
            (raw_success_rate * (1.0 - (violations as f64 * 0.05).min(0.5))).clamp(0.0, 1.0);

        Ok(UserBehaviorProfile {
            identity: identity.to_string(),
            account_age_secs,
            consistency_score: consistency_score(&timestamps),
            security_incident_count: incidents.min(u32::MAX as u64) as u32,
            api_usage_score: (total as f64 / API_USAGE_SATURATION).min(1.0),
            geo_consistency_score: inverse_distinct(activity.iter().map(|a| a.ip)),
            device_consistency_score: inverse_distinct(
                activity.iter().map(|a| a.user_agent_hash.clone()),
            ),
            mfa_enabled,
            success_rate,
            computed_at_ms: now_ms,
        })
    }
}

/// 1 − coefficient of variation of inter-request gaps, floored at 0
///
/// Fewer than three samples carry no timing signal and score neutral.
pub fn consistency_score(timestamps: &[i64]) -> f64 {
    if timestamps.len() < 3 {
        return 0.5;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort_unstable();
    let gaps: Vec<f64> = sorted.windows(2).map(|w| (w[1] - w[0]) as f64).collect();

    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    let cv = variance.sqrt() / mean;
    (1.0 - cv).clamp(0.0, 1.0)
}

/// 1 / distinct-value count; one stable value scores 1.0
fn inverse_distinct<T: std::hash::Hash + Eq>(values: impl Iterator<Item = T>) -> f64 {
    let distinct: HashSet<T> = values.collect();
    match distinct.len() {
        0 | 1 => 1.0,
        n => 1.0 / n as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_perfectly_regular() {
        let timestamps: Vec<i64> = (0..10).map(|i| i * 1_000).collect();
        assert!((consistency_score(&timestamps) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_consistency_bursty_traffic_scores_low() {
        let timestamps = vec![0, 10, 20, 30, 100_000];
        assert!(consistency_score(&timestamps) < 0.2);
    }

    #[test]
    fn test_consistency_too_few_samples_is_neutral() {
        assert_eq!(consistency_score(&[]), 0.5);
        assert_eq!(consistency_score(&[1, 2]), 0.5);
    }

    #[test]
    fn test_inverse_distinct() {
        assert_eq!(inverse_distinct(Vec::<u32>::new().into_iter()), 1.0);
        assert_eq!(inverse_distinct(vec![1, 1, 1].into_iter()), 1.0);
        assert_eq!(inverse_distinct(vec![1, 2, 3, 4].into_iter()), 0.25);
    }
}
