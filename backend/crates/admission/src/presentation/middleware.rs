//! Admission Middleware
//!
//! Gateway-facing layer: consults the deny list and challenge flags, runs
//! the admission check, and maps the outcome onto HTTP. Identity and tier
//! arrive as gateway-supplied headers; the core never issues tokens.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use platform::client::{extract_client_ip, extract_fingerprint, extract_string_header};

use crate::application::check::CheckAdmissionUseCase;
use crate::domain::repository::{
    AbuseSink, AccountRepository, ActivityRepository, CounterStore, EnforcementProbe,
    ViolationRepository,
};
use crate::domain::request::AdmissionRequest;

/// Gateway header carrying the authenticated user, if any
pub const USER_ID_HEADER: &str = "x-user-id";
/// Gateway header carrying the account tier, if any
pub const TIER_HEADER: &str = "x-tier";
/// Response header signalling the boundary to require extra verification
pub const CHALLENGE_HEADER: &str = "x-challenge-required";

/// Middleware state
pub struct AdmissionGuardState<R, P, S>
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
    pub probe: Arc<P>,
    pub sink: Arc<S>,
    pub clock: Arc<dyn platform::clock::Clock>,
}

impl<R, P, S> Clone for AdmissionGuardState<R, P, S>
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
            probe: self.probe.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
        }
    }
}

/// Middleware that admits, challenges or rejects every request
pub async fn admission_guard<R, P, S>(
    state: AdmissionGuardState<R, P, S>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, Response>
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
    let headers = req.headers();

    let direct_ip = req
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip());
    let Some(ip) = extract_client_ip(headers, direct_ip) else {
        return Err((StatusCode::BAD_REQUEST, ()).into_response());
    };

    let fingerprint = extract_fingerprint(headers, Some(ip));
    let request = AdmissionRequest {
        user_id: extract_string_header(headers, USER_ID_HEADER),
        ip,
        endpoint: req.uri().path().to_string(),
        method: req.method().as_str().to_string(),
        user_agent: fingerprint.user_agent,
        tier: extract_string_header(headers, TIER_HEADER),
    };

    // Every request that reaches the boundary feeds the abuse detectors,
    // whatever its outcome
    let sink = state.sink.clone();
    let observed = request.clone();
    tokio::spawn(async move {
        sink.observe(observed).await;
    });

    let identity = request.identity();
    let ip_string = request.ip.to_string();
    let now_ms = state.clock.now_ms();

    // Deny list and challenge flags written by the abuse responder.
    // Lookup failure fails open; enforcement is best-effort by design.
    match state.probe.denied_reason(&identity, &ip_string, now_ms).await {
        Ok(Some(reason)) => {
            tracing::warn!(identity, reason, "Request denied by enforcement list");
            return Err((StatusCode::FORBIDDEN, ()).into_response());
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Deny list lookup failed");
        }
    }

    match state
        .probe
        .challenge_required(&identity, &ip_string, now_ms)
        .await
    {
        Ok(true) => {
            return Err((
                StatusCode::UNAUTHORIZED,
                [(CHALLENGE_HEADER, "true")],
            )
                .into_response());
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Challenge flag lookup failed");
        }
    }

    let decision = match state.check.execute(&request).await {
        Ok(decision) => decision,
        Err(e) => return Err(e.into_response()),
    };

    if !decision.allowed {
        let retry_after = decision.retry_after_secs.unwrap_or(1);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.to_string())],
        )
            .into_response());
    }

    Ok(next.run(req).await)
}
