//! Unit tests for the admission crate

use std::sync::Arc;

use platform::clock::ManualClock;

use crate::application::check::CheckAdmissionUseCase;
use crate::application::config::AdmissionConfig;
use crate::application::metrics::Metrics;
use crate::application::behavior::BehaviorAnalyzer;
use crate::domain::request::AdmissionRequest;
use crate::domain::rule::{Algorithm, RateLimitRule, RuleScope, RuleSet, RuleSetHandle};
use crate::infra::memory::{MemoryAdmissionStore, MemoryEnforcementProbe};

/// 2023-11-14T22:13:20Z; late evening UTC, outside every peak band
const BASE_MS: i64 = 1_700_000_000_000;

struct Harness {
    uc: Arc<CheckAdmissionUseCase<MemoryAdmissionStore, MemoryEnforcementProbe>>,
    store: MemoryAdmissionStore,
    probe: MemoryEnforcementProbe,
    clock: Arc<ManualClock>,
    rules: Arc<RuleSetHandle>,
    metrics: Arc<Metrics>,
}

/// Use case over the in-memory store, with the adaptive multiplier pinned
/// to 1.0 so limits behave exactly as written
fn harness(rules: Vec<RateLimitRule>) -> Harness {
    let config = Arc::new(AdmissionConfig {
        min_limit_multiplier: 1.0,
        max_limit_multiplier: 1.0,
        ..AdmissionConfig::default()
    });
    let store = MemoryAdmissionStore::new();
    let probe = MemoryEnforcementProbe::new();
    let clock = Arc::new(ManualClock::new(BASE_MS));
    let rules = Arc::new(RuleSetHandle::new(RuleSet::new(rules).unwrap()));
    let metrics = Arc::new(Metrics::new());
    let analyzer = Arc::new(BehaviorAnalyzer::new(
        Arc::new(store.clone()),
        clock.clone(),
        config.clone(),
    ));
    let uc = Arc::new(CheckAdmissionUseCase::new(
        Arc::new(store.clone()),
        Arc::new(probe.clone()),
        analyzer,
        rules.clone(),
        metrics.clone(),
        clock.clone(),
        config,
    ));
    Harness {
        uc,
        store,
        probe,
        clock,
        rules,
        metrics,
    }
}

fn sliding_rule(name: &str, limit: u64, window_secs: u64) -> RateLimitRule {
    RateLimitRule {
        name: name.to_string(),
        limit,
        window_secs,
        key_pattern: format!("{name}:{{identity}}"),
        scope: RuleScope::Global,
        algorithm: Algorithm::SlidingWindow,
    }
}

fn request(user_id: Option<&str>) -> AdmissionRequest {
    AdmissionRequest {
        user_id: user_id.map(|s| s.to_string()),
        ip: "10.0.0.1".parse().unwrap(),
        endpoint: "/api/data".to_string(),
        method: "GET".to_string(),
        user_agent: Some("Mozilla/5.0".to_string()),
        tier: None,
    }
}

#[cfg(test)]
mod rule_config_tests {
    use super::*;
    use crate::application::reload::ReloadRulesUseCase;

    fn all_algorithms() -> Vec<RateLimitRule> {
        vec![
            sliding_rule("sw", 5, 60),
            RateLimitRule {
                name: "tb".to_string(),
                limit: 10,
                window_secs: 60,
                key_pattern: "tb:{identity}".to_string(),
                scope: RuleScope::Endpoint("/api/upload".to_string()),
                algorithm: Algorithm::TokenBucket {
                    bucket_size: Some(10.0),
                    refill_rate: Some(1.0),
                },
            },
            RateLimitRule {
                name: "lb".to_string(),
                limit: 20,
                window_secs: 30,
                key_pattern: "lb:{ip}".to_string(),
                scope: RuleScope::Tier("free".to_string()),
                algorithm: Algorithm::LeakyBucket {
                    bucket_size: None,
                    leak_rate: Some(0.5),
                },
            },
            RateLimitRule {
                name: "fw".to_string(),
                limit: 1000,
                window_secs: 3600,
                key_pattern: "fw:{tier}:{identity}".to_string(),
                scope: RuleScope::Ip("203.0.113.9".to_string()),
                algorithm: Algorithm::FixedWindow,
            },
        ]
    }

    #[test]
    fn test_rule_json_round_trip() {
        for rule in all_algorithms() {
            let json = serde_json::to_string(&rule).unwrap();
            let parsed: RateLimitRule = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, rule, "round trip must be lossless: {json}");
        }
    }

    #[test]
    fn test_rule_parses_from_config_format() {
        let json = r#"{
            "name": "login-burst",
            "limit": 10,
            "window_secs": 60,
            "key_pattern": "login:{ip}",
            "scope": {"kind": "endpoint", "value": "/api/auth/login"},
            "algorithm": "token_bucket",
            "bucket_size": 5.0
        }"#;
        let rule: RateLimitRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.name, "login-burst");
        assert_eq!(
            rule.algorithm,
            Algorithm::TokenBucket {
                bucket_size: Some(5.0),
                refill_rate: None,
            }
        );
        assert_eq!(
            rule.scope,
            RuleScope::Endpoint("/api/auth/login".to_string())
        );
    }

    #[test]
    fn test_reload_swaps_and_rejects_malformed() {
        let handle = Arc::new(RuleSetHandle::new(
            RuleSet::new(vec![sliding_rule("old", 5, 60)]).unwrap(),
        ));
        let use_case = ReloadRulesUseCase::new(handle.clone());

        let outcome = use_case.execute(vec![sliding_rule("new", 7, 60)]).unwrap();
        assert_eq!(outcome.version, 2);
        assert_eq!(handle.current().rules[0].name, "new");

        // Malformed set is rejected; the active set keeps serving
        let mut bad = sliding_rule("bad", 5, 60);
        bad.window_secs = 0;
        assert!(use_case.execute(vec![bad]).is_err());
        assert_eq!(handle.current().rules[0].name, "new");
        assert_eq!(handle.version(), 2);
    }
}

#[cfg(test)]
mod resolver_tests {
    use super::*;
    use crate::application::resolver::{self, PENALTY_RULE_NAME};
    use crate::domain::repository::PenaltyFactor;

    fn scoped_rules() -> Vec<RateLimitRule> {
        let mut ip_rule = sliding_rule("per-ip", 50, 60);
        ip_rule.scope = RuleScope::Ip("10.0.0.1".to_string());
        ip_rule.key_pattern = "ip:{ip}".to_string();

        let mut tier_rule = sliding_rule("per-tier", 100, 60);
        tier_rule.scope = RuleScope::Tier("default".to_string());
        tier_rule.key_pattern = "tier:{tier}:{identity}".to_string();

        let mut endpoint_rule = sliding_rule("per-endpoint", 20, 60);
        endpoint_rule.scope = RuleScope::Endpoint("/api/data".to_string());
        endpoint_rule.key_pattern = "ep:{endpoint}:{identity}".to_string();

        // Deliberately out of order
        vec![
            ip_rule,
            endpoint_rule,
            sliding_rule("global", 200, 60),
            tier_rule,
        ]
    }

    #[test]
    fn test_resolution_order_global_endpoint_tier_ip() {
        let set = RuleSet::new(scoped_rules()).unwrap();
        let resolved = resolver::resolve(&set, &request(Some("u1")), None, &AdmissionConfig::default());

        let names: Vec<&str> = resolved.iter().map(|r| r.rule.name.as_str()).collect();
        assert_eq!(names, vec!["global", "per-endpoint", "per-tier", "per-ip"]);
    }

    #[test]
    fn test_non_matching_scopes_are_skipped() {
        let set = RuleSet::new(scoped_rules()).unwrap();
        let mut req = request(Some("u1"));
        req.endpoint = "/api/other".to_string();
        req.ip = "192.0.2.7".parse().unwrap();

        let resolved = resolver::resolve(&set, &req, None, &AdmissionConfig::default());
        let names: Vec<&str> = resolved.iter().map(|r| r.rule.name.as_str()).collect();
        assert_eq!(names, vec!["global", "per-tier"]);
    }

    #[test]
    fn test_placeholder_substitution_and_fallbacks() {
        let key = resolver::substitute_key(
            "k:{identity}:{ip}:{endpoint}:{tier}",
            &request(Some("u1")),
        );
        assert_eq!(key, "k:u1:10.0.0.1:/api/data:default");

        // Anonymous identity degrades to the IP
        let key = resolver::substitute_key("k:{identity}", &request(None));
        assert_eq!(key, "k:10.0.0.1");
    }

    #[test]
    fn test_identical_resolved_keys_evaluated_once() {
        let mut a = sliding_rule("a", 5, 60);
        a.key_pattern = "shared:{identity}".to_string();
        let mut b = sliding_rule("b", 9, 60);
        b.key_pattern = "shared:{identity}".to_string();

        let set = RuleSet::new(vec![a, b]).unwrap();
        let resolved = resolver::resolve(&set, &request(Some("u1")), None, &AdmissionConfig::default());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].rule.name, "a");
    }

    #[test]
    fn test_penalty_appends_dynamic_rule() {
        let config = AdmissionConfig::default();
        let set = RuleSet::new(vec![sliding_rule("global", 100, 60)]).unwrap();
        let penalty = PenaltyFactor {
            factor: 0.5,
            reason: "abuse".to_string(),
            expires_at_ms: BASE_MS + 60_000,
        };

        let resolved = resolver::resolve(&set, &request(Some("u1")), Some(&penalty), &config);
        assert_eq!(resolved.len(), 2);
        let dynamic = &resolved[1];
        assert_eq!(dynamic.rule.name, PENALTY_RULE_NAME);
        assert_eq!(dynamic.rule.limit, config.penalty_base_limit / 2);
        assert_eq!(dynamic.counter_key, "penalty:u1");

        // A zero factor is a full temporary block
        let blocked = PenaltyFactor {
            factor: 0.0,
            ..penalty
        };
        let resolved = resolver::resolve(&set, &request(Some("u1")), Some(&blocked), &config);
        assert_eq!(resolved[1].rule.limit, 0);
    }
}

#[cfg(test)]
mod adaptive_tests {
    use super::*;
    use crate::application::adaptive;
    use crate::domain::profile::UserBehaviorProfile;

    fn trusted_profile() -> UserBehaviorProfile {
        UserBehaviorProfile {
            identity: "u1".to_string(),
            account_age_secs: 400 * 24 * 3_600,
            consistency_score: 1.0,
            security_incident_count: 0,
            api_usage_score: 1.0,
            geo_consistency_score: 1.0,
            device_consistency_score: 1.0,
            mfa_enabled: true,
            success_rate: 1.0,
            computed_at_ms: BASE_MS,
        }
    }

    #[test]
    fn test_combined_modifier_respects_clamp_band() {
        let config = AdmissionConfig {
            min_limit_multiplier: 0.5,
            max_limit_multiplier: 1.3,
            ..AdmissionConfig::default()
        };
        let m = adaptive::modifier(&trusted_profile(), "/api/data", BASE_MS, &config);
        assert!(m.combined <= 1.3);
        assert!(m.combined >= 0.5);
    }

    #[test]
    fn test_high_trust_raises_low_trust_tightens() {
        let config = AdmissionConfig::default();
        let rule = sliding_rule("r", 100, 60);

        let high = adaptive::adjust(&rule, &trusted_profile(), "/api/data", BASE_MS, &config);
        assert!(high.limit > 100, "trusted identity should get headroom");

        let mut suspect = trusted_profile();
        suspect.security_incident_count = 5;
        suspect.success_rate = 0.2;
        suspect.mfa_enabled = false;
        let low = adaptive::adjust(&rule, &suspect, "/api/data", BASE_MS, &config);
        assert!(low.limit < 100, "suspect identity should be tightened");
        assert!(low.limit >= 1);
    }

    #[test]
    fn test_sensitive_endpoint_tightens_low_trust() {
        let config = AdmissionConfig::default();
        let mut suspect = trusted_profile();
        suspect.security_incident_count = 5;
        suspect.success_rate = 0.0;
        suspect.mfa_enabled = false;

        let sensitive = adaptive::modifier(&suspect, "/api/auth/login", BASE_MS, &config);
        let plain = adaptive::modifier(&suspect, "/api/data", BASE_MS, &config);
        assert!(sensitive.endpoint_affinity < plain.endpoint_affinity);
    }

    #[test]
    fn test_time_of_day_bands() {
        let config = AdmissionConfig::default();
        let profile = trusted_profile();
        // 1970-01-01: 03:00 off-peak, 12:00 peak, 20:00 neutral
        let off_peak = adaptive::modifier(&profile, "/x", 3 * 3_600_000, &config);
        let peak = adaptive::modifier(&profile, "/x", 12 * 3_600_000, &config);
        let neutral = adaptive::modifier(&profile, "/x", 20 * 3_600_000, &config);
        assert_eq!(off_peak.time_of_day, 1.2);
        assert_eq!(peak.time_of_day, 0.9);
        assert_eq!(neutral.time_of_day, 1.0);
    }

    #[test]
    fn test_zero_limit_never_resurrected() {
        let config = AdmissionConfig::default();
        let rule = sliding_rule("blocked", 0, 60);
        let adjusted = adaptive::adjust(&rule, &trusted_profile(), "/api/data", BASE_MS, &config);
        assert_eq!(adjusted.limit, 0);
    }

    #[test]
    fn test_bucket_size_scales_with_limit() {
        let config = AdmissionConfig::default();
        let rule = RateLimitRule {
            name: "tb".to_string(),
            limit: 100,
            window_secs: 60,
            key_pattern: "tb:{identity}".to_string(),
            scope: RuleScope::Global,
            algorithm: Algorithm::TokenBucket {
                bucket_size: Some(50.0),
                refill_rate: Some(2.0),
            },
        };
        let adjusted = adaptive::adjust(&rule, &trusted_profile(), "/api/data", BASE_MS, &config);
        let m = adjusted.limit as f64 / 100.0;
        match adjusted.algorithm {
            Algorithm::TokenBucket {
                bucket_size: Some(b),
                refill_rate,
            } => {
                assert!((b / 50.0 - m).abs() < 0.05, "bucket scales with limit");
                assert_eq!(refill_rate, Some(2.0));
            }
            other => panic!("unexpected algorithm {other:?}"),
        }
    }
}

#[cfg(test)]
mod behavior_tests {
    use super::*;
    use crate::domain::profile::{AccountInfo, RequestActivity};
    use crate::domain::repository::ActivityRepository;

    #[tokio::test]
    async fn test_anonymous_gets_fixed_neutral_profile() {
        let h = harness(vec![]);
        let analyzer = h.uc.analyzer();

        let (profile, needs_refresh) = analyzer.profile_for_check("10.0.0.1", false);
        assert!(!needs_refresh, "anonymous profiles are never recomputed");
        assert_eq!(profile.account_age_secs, 0);
        assert!(!profile.mfa_enabled);
    }

    #[tokio::test]
    async fn test_cold_miss_serves_neutral_and_flags_refresh() {
        let h = harness(vec![]);
        let analyzer = h.uc.analyzer();

        let (_, needs_refresh) = analyzer.profile_for_check("u1", true);
        assert!(needs_refresh);
    }

    #[tokio::test]
    async fn test_refresh_computes_from_history() {
        let h = harness(vec![]);
        let analyzer = h.uc.analyzer();

        h.store.upsert_account(
            "u1",
            AccountInfo {
                created_at_ms: BASE_MS - 400 * 24 * 3_600_000,
                mfa_enabled: true,
            },
        );
        // Perfectly regular successful traffic from one IP and one device
        for i in 0..20 {
            ActivityRepository::record(
                &h.store,
                &RequestActivity {
                    identity: "u1".to_string(),
                    occurred_at_ms: BASE_MS - 60_000 + i * 1_000,
                    endpoint: "/api/data".to_string(),
                    ip: Some("10.0.0.1".parse().unwrap()),
                    user_agent_hash: Some(vec![1; 32]),
                    success: true,
                },
            )
            .await
            .unwrap();
        }

        let profile = analyzer.refresh("u1").await.unwrap();
        assert!(profile.mfa_enabled);
        assert!(profile.account_age_secs > 365 * 24 * 3_600);
        assert!((profile.consistency_score - 1.0).abs() < 1e-9);
        assert_eq!(profile.geo_consistency_score, 1.0);
        assert_eq!(profile.device_consistency_score, 1.0);
        assert_eq!(profile.success_rate, 1.0);
        assert!(profile.trust_score() > 0.7);

        // Now cached; no refresh needed
        let (cached, needs_refresh) = analyzer.profile_for_check("u1", true);
        assert!(!needs_refresh);
        assert_eq!(cached, profile);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let h = harness(vec![]);
        let analyzer = h.uc.analyzer();

        analyzer.refresh("u1").await.unwrap();
        assert!(analyzer.cached("u1").is_some());

        analyzer.invalidate("u1");
        assert!(analyzer.cached("u1").is_none());
    }
}

#[cfg(test)]
mod check_tests {
    use super::*;
    use crate::application::resolver::PENALTY_RULE_NAME;
    use crate::domain::repository::PenaltyFactor;

    #[tokio::test]
    async fn test_sliding_window_scenario_five_per_minute() {
        let h = harness(vec![sliding_rule("global", 5, 60)]);
        let req = request(Some("u1"));

        for i in 1..=5 {
            let decision = h.uc.execute(&req).await.unwrap();
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.current, i);
            assert_eq!(decision.limit, 5);
        }

        let decision = h.uc.execute(&req).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.rule.as_deref(), Some("global"));
        assert_eq!(decision.retry_after_secs, Some(60));

        let violations = h.store.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].identity, "u1");
        assert_eq!(violations[0].rule_name, "global");
        assert_eq!(violations[0].current, 5);

        let snap = h.metrics.snapshot();
        assert_eq!(snap.total_requests, 6);
        assert_eq!(snap.blocked_requests, 1);
        assert_eq!(snap.top_violated_rules[0].name, "global");
    }

    #[tokio::test]
    async fn test_token_bucket_scenario_burst_then_one_per_second() {
        let h = harness(vec![RateLimitRule {
            name: "burst".to_string(),
            limit: 10,
            window_secs: 60,
            key_pattern: "burst:{identity}".to_string(),
            scope: RuleScope::Global,
            algorithm: Algorithm::TokenBucket {
                bucket_size: Some(10.0),
                refill_rate: Some(1.0),
            },
        }]);
        let req = request(Some("u1"));

        for i in 1..=10 {
            let decision = h.uc.execute(&req).await.unwrap();
            assert!(decision.allowed, "burst request {i} should pass");
        }
        let decision = h.uc.execute(&req).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, Some(1));

        // One second later exactly one more slot has accrued
        h.clock.advance(1_000);
        assert!(h.uc.execute(&req).await.unwrap().allowed);
        assert!(!h.uc.execute(&req).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_first_rejecting_rule_wins() {
        let mut endpoint_rule = sliding_rule("narrow", 0, 60);
        endpoint_rule.scope = RuleScope::Endpoint("/api/data".to_string());
        endpoint_rule.key_pattern = "narrow:{identity}".to_string();

        // Both reject; the global rule is evaluated first
        let h = harness(vec![endpoint_rule, sliding_rule("wide", 0, 60)]);
        let decision = h.uc.execute(&request(Some("u1"))).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.rule.as_deref(), Some("wide"));
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let h = harness(vec![sliding_rule("global", 1, 60)]);
        h.store.set_unavailable(true);

        let decision = h.uc.execute(&request(Some("u1"))).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.degraded);

        let snap = h.metrics.snapshot();
        assert_eq!(snap.degraded_checks, 1);
        assert_eq!(snap.blocked_requests, 0);

        // Recovery resumes normal accounting
        h.store.set_unavailable(false);
        let decision = h.uc.execute(&request(Some("u1"))).await.unwrap();
        assert!(decision.allowed);
        assert!(!decision.degraded);
    }

    #[tokio::test]
    async fn test_validation_error_touches_no_counters() {
        let h = harness(vec![sliding_rule("global", 5, 60)]);
        let mut req = request(Some("u1"));
        req.endpoint = "".to_string();

        assert!(h.uc.execute(&req).await.is_err());
        assert_eq!(h.metrics.snapshot().total_requests, 0);
        assert!(h.store.counter_state("global:u1").is_none());
    }

    #[tokio::test]
    async fn test_reload_swaps_limits_atomically() {
        let h = harness(vec![sliding_rule("global", 1, 60)]);
        let req = request(Some("u1"));

        assert!(h.uc.execute(&req).await.unwrap().allowed);
        assert!(!h.uc.execute(&req).await.unwrap().allowed);

        h.rules
            .swap(RuleSet::new(vec![sliding_rule("roomy", 100, 60)]).unwrap());
        assert!(h.uc.execute(&req).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_active_penalty_enforced_as_dynamic_rule() {
        let h = harness(vec![sliding_rule("global", 100, 60)]);
        h.probe.penalize(
            "u1",
            PenaltyFactor {
                factor: 0.0,
                reason: "abuse escalation".to_string(),
                expires_at_ms: BASE_MS + 300_000,
            },
        );

        let decision = h.uc.execute(&request(Some("u1"))).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.rule.as_deref(), Some(PENALTY_RULE_NAME));

        // Other identities are unaffected
        let decision = h.uc.execute(&request(Some("u2"))).await.unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_racing_checks_never_over_admit() {
        let h = harness(vec![sliding_rule("global", 10, 60)]);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let uc = h.uc.clone();
            handles.push(tokio::spawn(async move {
                uc.execute(&request(Some("u1"))).await.unwrap().allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10, "exactly limit admits under contention");
    }
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use crate::domain::outcome::AdmissionDecision;
    use crate::presentation::dto::{CheckRequest, CheckResponse};

    #[test]
    fn test_check_request_deserialization() {
        let json = r#"{"userId":"u1","ip":"10.0.0.1","endpoint":"/api/data","method":"GET"}"#;
        let req: CheckRequest = serde_json::from_str(json).unwrap();
        let domain = req.into_domain().unwrap();
        assert_eq!(domain.user_id.as_deref(), Some("u1"));
        assert!(domain.user_agent.is_none());
    }

    #[test]
    fn test_check_request_rejects_bad_ip() {
        let json = r#"{"ip":"not-an-ip","endpoint":"/api/data","method":"GET"}"#;
        let req: CheckRequest = serde_json::from_str(json).unwrap();
        assert!(req.into_domain().is_err());
    }

    #[test]
    fn test_check_response_serialization() {
        let decision = AdmissionDecision::allowed(Some("global".to_string()), 3, 10, 60);
        let json = serde_json::to_string(&CheckResponse::from(decision)).unwrap();
        assert!(json.contains(r#""allowed":true"#));
        assert!(json.contains(r#""windowRemainingSecs":60"#));
        assert!(!json.contains("retryAfterSecs"));

        let rejected = AdmissionDecision {
            allowed: false,
            reason: Some("rule 'g' exceeded: 10/10".to_string()),
            retry_after_secs: Some(42),
            rule: Some("g".to_string()),
            current: 10,
            limit: 10,
            window_remaining_secs: 42,
            degraded: false,
        };
        let json = serde_json::to_string(&CheckResponse::from(rejected)).unwrap();
        assert!(json.contains(r#""retryAfterSecs":42"#));
    }

    #[test]
    fn test_metrics_snapshot_serialization() {
        let metrics = Metrics::new();
        metrics.record_blocked("global", "u1", 500);
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains(r#""totalRequests":1"#));
        assert!(json.contains(r#""blockRate":1.0"#));
        assert!(json.contains(r#""topViolatedRules""#));
    }
}

#[cfg(test)]
mod middleware_tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::middleware::{Next, from_fn};
    use axum::routing::get;
    use tower::ServiceExt;

    use crate::domain::repository::NoopAbuseSink;
    use crate::presentation::middleware::{
        AdmissionGuardState, CHALLENGE_HEADER, admission_guard,
    };

    fn guarded_app(h: &Harness) -> Router {
        let state = AdmissionGuardState {
            check: h.uc.clone(),
            probe: Arc::new(h.probe.clone()),
            sink: Arc::new(NoopAbuseSink),
            clock: h.clock.clone(),
        };
        Router::new()
            .route("/api/data", get(|| async { "ok" }))
            .layer(from_fn(move |req: Request<Body>, next: Next| {
                let state = state.clone();
                admission_guard(state, req, next)
            }))
    }

    fn get_request(user: &str) -> Request<Body> {
        Request::builder()
            .uri("/api/data")
            .header("x-forwarded-for", "10.0.0.1")
            .header("user-agent", "Mozilla/5.0")
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_allows_then_rejects_with_retry_after() {
        let h = harness(vec![sliding_rule("global", 1, 60)]);
        let app = guarded_app(&h);

        let response = app.clone().oneshot(get_request("u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get_request("u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry = response.headers().get("retry-after").unwrap();
        assert_eq!(retry.to_str().unwrap(), "60");
    }

    #[tokio::test]
    async fn test_denied_identity_gets_403() {
        let h = harness(vec![sliding_rule("global", 100, 60)]);
        h.probe.deny("u1", "scripted abuse", BASE_MS + 60_000);
        let app = guarded_app(&h);

        let response = app.clone().oneshot(get_request("u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Other identities from the same IP are unaffected
        let response = app.clone().oneshot(get_request("u2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_challenge_flag_gets_401_with_header() {
        let h = harness(vec![sliding_rule("global", 100, 60)]);
        h.probe.require_challenge("u1", BASE_MS + 60_000);
        let app = guarded_app(&h);

        let response = app.oneshot(get_request("u1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(CHALLENGE_HEADER).unwrap(), "true");
    }
}
