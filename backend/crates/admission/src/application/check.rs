//! Check Admission Use Case
//!
//! The synchronous decision path: resolve rules, adapt limits from the
//! cached profile, evaluate against the counter store in order, stop at the
//! first rejection. Store failure fails open with a degraded-mode event.
//! Profile refresh and activity recording run off the critical path.

use std::sync::Arc;
use std::time::Instant;

use platform::clock::Clock;

use crate::application::adaptive;
use crate::application::behavior::BehaviorAnalyzer;
use crate::application::config::AdmissionConfig;
use crate::application::metrics::Metrics;
use crate::application::resolver::{self, ResolvedRule};
use crate::domain::counter::RuleCheckOutcome;
use crate::domain::outcome::{AdmissionDecision, Violation};
use crate::domain::profile::RequestActivity;
use crate::domain::repository::{
    AccountRepository, ActivityRepository, CounterStore, EnforcementProbe, PenaltyFactor,
    ViolationRepository,
};
use crate::domain::request::AdmissionRequest;
use crate::domain::rule::RuleSetHandle;
use crate::error::AdmissionResult;

/// Check Admission Use Case
pub struct CheckAdmissionUseCase<R, P>
where
    R: CounterStore
        + ViolationRepository
        + ActivityRepository
        + AccountRepository
        + Send
        + Sync
        + 'static,
    P: EnforcementProbe + Send + Sync + 'static,
{
    repo: Arc<R>,
    probe: Arc<P>,
    analyzer: Arc<BehaviorAnalyzer<R>>,
    rules: Arc<RuleSetHandle>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    config: Arc<AdmissionConfig>,
}

impl<R, P> CheckAdmissionUseCase<R, P>
where
    R: CounterStore
        + ViolationRepository
        + ActivityRepository
        + AccountRepository
        + Send
        + Sync
        + 'static,
    P: EnforcementProbe + Send + Sync + 'static,
{
    pub fn new(
        repo: Arc<R>,
        probe: Arc<P>,
        analyzer: Arc<BehaviorAnalyzer<R>>,
        rules: Arc<RuleSetHandle>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        config: Arc<AdmissionConfig>,
    ) -> Self {
        Self {
            repo,
            probe,
            analyzer,
            rules,
            metrics,
            clock,
            config,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn analyzer(&self) -> Arc<BehaviorAnalyzer<R>> {
        self.analyzer.clone()
    }

    /// Run the admission check for one request
    ///
    /// Returns `Err` only for validation failures; store trouble is
    /// recovered locally by failing open.
    pub async fn execute(&self, request: &AdmissionRequest) -> AdmissionResult<AdmissionDecision> {
        request.validate()?;

        let started = Instant::now();
        let now_ms = self.clock.now_ms();
        let identity = request.identity();

        let (profile, needs_refresh) = self
            .analyzer
            .profile_for_check(&identity, request.is_authenticated());
        if needs_refresh {
            self.spawn_refresh(identity.clone());
        }

        let penalty = self.lookup_penalty(&identity, request, now_ms).await;
        let rule_set = self.rules.current();
        let resolved = resolver::resolve(&rule_set, request, penalty.as_ref(), &self.config);

        // Aggregate allow reports the first evaluated rule's counters
        let mut first_outcome: Option<(String, RuleCheckOutcome)> = None;

        for ResolvedRule { rule, counter_key } in &resolved {
            let effective =
                adaptive::adjust(rule, &profile, &request.endpoint, now_ms, &self.config);

            let checked = tokio::time::timeout(
                self.config.store_timeout,
                self.repo.check_and_update(counter_key, &effective, now_ms),
            )
            .await;

            let outcome = match checked {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    return Ok(self.fail_open(request, &rule.name, started, &e.to_string()));
                }
                Err(_) => {
                    return Ok(self.fail_open(request, &rule.name, started, "transaction timed out"));
                }
            };

            if !outcome.allowed {
                return Ok(self
                    .reject(request, &identity, &rule.name, outcome, now_ms, started)
                    .await);
            }
            if first_outcome.is_none() {
                first_outcome = Some((rule.name.clone(), outcome));
            }
        }

        self.metrics
            .record_allowed(started.elapsed().as_micros() as u64);
        self.record_activity(request, now_ms, true);

        let decision = match first_outcome {
            Some((rule_name, outcome)) => AdmissionDecision::allowed(
                Some(rule_name),
                outcome.current,
                outcome.limit,
                outcome.window_remaining_secs,
            ),
            None => AdmissionDecision::allowed(None, 0, 0, 0),
        };
        Ok(decision)
    }

    async fn lookup_penalty(
        &self,
        identity: &str,
        request: &AdmissionRequest,
        now_ms: i64,
    ) -> Option<PenaltyFactor> {
        match self
            .probe
            .active_penalty(identity, &request.ip.to_string(), now_ms)
            .await
        {
            Ok(penalty) => penalty,
            Err(e) => {
                // Enforcement lookups are best-effort on the decision path
                tracing::warn!(error = %e, identity, "Penalty lookup failed");
                None
            }
        }
    }

    /// Store unreachable: allow, flag degraded, log distinctly from allows
    fn fail_open(
        &self,
        request: &AdmissionRequest,
        rule_name: &str,
        started: Instant,
        cause: &str,
    ) -> AdmissionDecision {
        self.metrics
            .record_degraded(started.elapsed().as_micros() as u64);
        tracing::warn!(
            rule = rule_name,
            endpoint = %request.endpoint,
            cause,
            "Counter store unavailable, admitting request in degraded mode"
        );
        AdmissionDecision::degraded_allow()
    }

    async fn reject(
        &self,
        request: &AdmissionRequest,
        identity: &str,
        rule_name: &str,
        outcome: RuleCheckOutcome,
        now_ms: i64,
        started: Instant,
    ) -> AdmissionDecision {
        self.metrics.record_blocked(
            rule_name,
            identity,
            started.elapsed().as_micros() as u64,
        );

        let violation = Violation::new(request, rule_name, &outcome, now_ms);
        tracing::warn!(
            violation_id = %violation.id,
            identity,
            ip = %violation.ip,
            endpoint = %violation.endpoint,
            rule = rule_name,
            current = outcome.current,
            limit = outcome.limit,
            "Rate limit violation"
        );
        // Recorder failure never flips an already-made decision
        if let Err(e) = ViolationRepository::record(self.repo.as_ref(), &violation).await {
            tracing::warn!(error = %e, "Failed to persist violation");
        }
        self.record_activity(request, now_ms, false);
        self.analyzer.invalidate(identity);

        AdmissionDecision::rejected(rule_name, &outcome)
    }

    fn spawn_refresh(&self, identity: String) {
        let analyzer = self.analyzer.clone();
        tokio::spawn(async move {
            if let Err(e) = analyzer.refresh(&identity).await {
                tracing::warn!(error = %e, identity, "Profile refresh failed");
            }
        });
    }

    /// Record activity off the decision path
    fn record_activity(&self, request: &AdmissionRequest, now_ms: i64, success: bool) {
        let activity = RequestActivity {
            identity: request.identity(),
            occurred_at_ms: now_ms,
            endpoint: request.endpoint.clone(),
            ip: Some(request.ip),
            user_agent_hash: request
                .user_agent
                .as_deref()
                .map(|ua| platform::crypto::sha256(ua.as_bytes()).to_vec()),
            success,
        };
        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(e) = ActivityRepository::record(repo.as_ref(), &activity).await {
                tracing::debug!(error = %e, "Failed to record request activity");
            }
        });
    }
}
