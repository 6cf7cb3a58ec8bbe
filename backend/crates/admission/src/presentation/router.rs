//! Admission Router

use axum::{
    Router,
    routing::{get, post},
};

use crate::domain::repository::{
    AbuseSink, AccountRepository, ActivityRepository, CounterStore, EnforcementProbe,
    ViolationRepository,
};
use crate::presentation::handlers::{self, AdmissionAppState};

/// Create the admission router for any repository/probe/sink combination
///
/// The enforcement probe implementation lives in the abuse crate, so wiring
/// happens at the application entry point.
pub fn admission_router<R, P, S>(state: AdmissionAppState<R, P, S>) -> Router
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
    Router::new()
        .route("/check", post(handlers::check_admission::<R, P, S>))
        .route("/reload", post(handlers::reload_rules::<R, P, S>))
        .route("/metrics", get(handlers::metrics_snapshot::<R, P, S>))
        .with_state(state)
}
