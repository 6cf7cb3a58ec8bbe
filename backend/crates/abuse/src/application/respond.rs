//! Response Manager
//!
//! Maps a combined abuse decision to its enforcement side effect: deny-list
//! entry, challenge flag, temporary penalty, or a log line. Execution is
//! best-effort; failures are logged and never reach the admission caller.

use std::sync::Arc;

use admission::domain::request::AdmissionRequest;

use crate::application::config::AbuseConfig;
use crate::domain::entities::{AbuseAnalysis, EnforcementAction};
use crate::domain::repository::{EnforcementRepository, identity_key, ip_key};
use crate::error::AbuseResult;

pub struct ResponseManager<E>
where
    E: EnforcementRepository,
{
    repo: Arc<E>,
    config: Arc<AbuseConfig>,
}

impl<E> ResponseManager<E>
where
    E: EnforcementRepository,
{
    pub fn new(repo: Arc<E>, config: Arc<AbuseConfig>) -> Self {
        Self { repo, config }
    }

    /// Execute the enforcement action for one analyzed request
    pub async fn execute(&self, request: &AdmissionRequest, analysis: &AbuseAnalysis, now_ms: i64) {
        let result = self.try_execute(request, analysis, now_ms).await;
        if let Err(e) = result {
            // Enforcement is layered on top of the admission decision, not
            // a precondition for it
            tracing::error!(
                error = %e,
                action = %analysis.action,
                identity = %request.identity(),
                "Enforcement action failed"
            );
        }
    }

    async fn try_execute(
        &self,
        request: &AdmissionRequest,
        analysis: &AbuseAnalysis,
        now_ms: i64,
    ) -> AbuseResult<()> {
        let identity = request.identity();
        let ip = request.ip.to_string();
        let reason = enforcement_reason(analysis);

        match analysis.action {
            EnforcementAction::Allow => {}
            EnforcementAction::Monitor => {
                tracing::warn!(
                    identity,
                    ip,
                    endpoint = %request.endpoint,
                    risk = analysis.risk_score,
                    indicators = ?analysis.indicators,
                    "Abuse monitor"
                );
            }
            EnforcementAction::RateLimit => {
                let expires_at_ms = now_ms + self.config.penalty_ttl_ms();
                self.repo
                    .apply_penalty(
                        &identity_key(&identity),
                        self.config.penalty_factor,
                        &reason,
                        expires_at_ms,
                    )
                    .await?;
                tracing::warn!(identity, risk = analysis.risk_score, "Temporary penalty applied");
            }
            EnforcementAction::Challenge => {
                let expires_at_ms = now_ms + self.config.challenge_ttl_ms();
                self.repo
                    .require_challenge(&identity_key(&identity), &reason, expires_at_ms)
                    .await?;
                self.repo
                    .require_challenge(&ip_key(&ip), &reason, expires_at_ms)
                    .await?;
                tracing::warn!(identity, ip, risk = analysis.risk_score, "Challenge required");
            }
            EnforcementAction::Block => {
                let expires_at_ms = now_ms + self.config.deny_ttl_ms();
                self.repo
                    .deny(&identity_key(&identity), &reason, expires_at_ms)
                    .await?;
                self.repo.deny(&ip_key(&ip), &reason, expires_at_ms).await?;
                tracing::warn!(
                    identity,
                    ip,
                    risk = analysis.risk_score,
                    indicators = ?analysis.indicators,
                    "Identity and IP blocked"
                );
            }
        }
        Ok(())
    }
}

fn enforcement_reason(analysis: &AbuseAnalysis) -> String {
    let indicators: Vec<&str> = analysis.indicators.iter().map(|s| s.as_str()).collect();
    format!(
        "risk {:.1}: {}",
        analysis.risk_score,
        if indicators.is_empty() {
            "unspecified".to_string()
        } else {
            indicators.join(",")
        }
    )
}
