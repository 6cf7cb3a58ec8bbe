//! HTTP Handlers

use std::sync::Arc;

use axum::Json;
use axum::extract::State;

use crate::application::check::CheckAdmissionUseCase;
use crate::application::metrics::{Metrics, MetricsSnapshot};
use crate::application::reload::ReloadRulesUseCase;
use crate::domain::repository::{
    AbuseSink, AccountRepository, ActivityRepository, CounterStore, EnforcementProbe,
    ViolationRepository,
};
use crate::domain::rule::RuleSetHandle;
use crate::error::AdmissionResult;
use crate::presentation::dto::{
    CheckRequest, CheckResponse, ReloadRequest, ReloadResponse,
};

/// Shared state for admission handlers
pub struct AdmissionAppState<R, P, S>
where
    R: CounterStore
        + ViolationRepository
        + ActivityRepository
        + AccountRepository
        + Send
        + Sync
        + 'static,
    P: EnforcementProbe + Send + Sync + 'static,
    S: AbuseSink + Send + Sync + 'static,
{
    pub check: Arc<CheckAdmissionUseCase<R, P>>,
    pub rules: Arc<RuleSetHandle>,
    pub metrics: Arc<Metrics>,
    pub sink: Arc<S>,
}

impl<R, P, S> Clone for AdmissionAppState<R, P, S>
where
    R: CounterStore
        + ViolationRepository
        + ActivityRepository
        + AccountRepository
        + Send
        + Sync
        + 'static,
    P: EnforcementProbe + Send + Sync + 'static,
    S: AbuseSink + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            check: self.check.clone(),
            rules: self.rules.clone(),
            metrics: self.metrics.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// POST /api/admission/check
pub async fn check_admission<R, P, S>(
    State(state): State<AdmissionAppState<R, P, S>>,
    Json(req): Json<CheckRequest>,
) -> AdmissionResult<Json<CheckResponse>>
where
    R: CounterStore
        + ViolationRepository
        + ActivityRepository
        + AccountRepository
        + Send
        + Sync
        + 'static,
    P: EnforcementProbe + Send + Sync + 'static,
    S: AbuseSink + Send + Sync + 'static,
{
    let request = req.into_domain()?;

    let decision = state.check.execute(&request).await?;

    // Abuse analysis is decoupled from the decision path
    let sink = state.sink.clone();
    tokio::spawn(async move {
        sink.observe(request).await;
    });

    Ok(Json(CheckResponse::from(decision)))
}

/// POST /api/admission/reload
pub async fn reload_rules<R, P, S>(
    State(state): State<AdmissionAppState<R, P, S>>,
    Json(req): Json<ReloadRequest>,
) -> AdmissionResult<Json<ReloadResponse>>
where
    R: CounterStore
        + ViolationRepository
        + ActivityRepository
        + AccountRepository
        + Send
        + Sync
        + 'static,
    P: EnforcementProbe + Send + Sync + 'static,
    S: AbuseSink + Send + Sync + 'static,
{
    let use_case = ReloadRulesUseCase::new(state.rules.clone());
    let outcome = use_case.execute(req.rules)?;

    Ok(Json(ReloadResponse {
        version: outcome.version,
        rule_count: outcome.rule_count,
    }))
}

/// GET /api/admission/metrics
pub async fn metrics_snapshot<R, P, S>(
    State(state): State<AdmissionAppState<R, P, S>>,
) -> Json<MetricsSnapshot>
where
    R: CounterStore
        + ViolationRepository
        + ActivityRepository
        + AccountRepository
        + Send
        + Sync
        + 'static,
    P: EnforcementProbe + Send + Sync + 'static,
    S: AbuseSink + Send + Sync + 'static,
{
    Json(state.metrics.snapshot())
}
