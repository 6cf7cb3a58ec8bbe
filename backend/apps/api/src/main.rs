//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors, but application-level
//! errors should use `kernel::error::AppError`.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use abuse::{
    AbuseConfig, AbuseDetectionEngine, AbuseService, PgEnforcementRepository, ResponseManager,
};
use admission::{
    AdmissionAppState, AdmissionConfig, Algorithm, BehaviorAnalyzer, CheckAdmissionUseCase,
    Metrics, PgAdmissionRepository, RateLimitRule, RuleScope, RuleSet, RuleSetHandle,
    admission_router,
};
use axum::{
    Router, http,
    http::{Method, header},
};
use platform::clock::{Clock, SystemClock};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Re-export unified error types for use in handlers
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

const CLEANUP_INTERVAL_SECS: u64 = 600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,admission=info,abuse=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database connection
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set in environment");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed");

    let admission_config = Arc::new(AdmissionConfig::default());
    let abuse_config = Arc::new(AbuseConfig::default());

    // Startup cleanup: remove expired admission and enforcement data.
    // Errors here should not prevent server startup
    let repo = Arc::new(PgAdmissionRepository::new(pool.clone()));
    let enforcement = Arc::new(PgEnforcementRepository::new(pool.clone()));
    run_cleanup(&repo, &enforcement, &admission_config).await;

    // Active rule set: from RULES_PATH when set, else built-in defaults
    let rule_set = load_rules()?;
    tracing::info!(rules = rule_set.len(), "Rule set loaded");
    let rules = Arc::new(RuleSetHandle::new(rule_set));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());
    let analyzer = Arc::new(BehaviorAnalyzer::new(
        repo.clone(),
        clock.clone(),
        admission_config.clone(),
    ));
    let check = Arc::new(CheckAdmissionUseCase::new(
        repo.clone(),
        enforcement.clone(),
        analyzer,
        rules.clone(),
        metrics.clone(),
        clock.clone(),
        admission_config.clone(),
    ));

    // Abuse analysis pipeline, consumed as a post-decision sink
    let engine = Arc::new(AbuseDetectionEngine::with_default_detectors(
        abuse_config.clone(),
    ));
    let responder = Arc::new(ResponseManager::new(
        enforcement.clone(),
        abuse_config.clone(),
    ));
    let sink = Arc::new(AbuseService::new(engine, responder, clock.clone()));

    let state = AdmissionAppState {
        check,
        rules,
        metrics,
        sink,
    };

    // Periodic cleanup of expired counters, violations and enforcement rows
    spawn_cleanup_task(repo.clone(), enforcement.clone(), admission_config.clone());

    // CORS configuration
    let frontend_origins = env::var("FRONTEND_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:40922,http://127.0.0.1:40922".to_string());

    let allowed_origins: Vec<http::HeaderValue> = frontend_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]))
        .allow_credentials(true);

    // Build router
    let app = Router::new()
        .nest("/api/admission", admission_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], 31140));
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn run_cleanup(
    repo: &PgAdmissionRepository,
    enforcement: &PgEnforcementRepository,
    config: &AdmissionConfig,
) {
    match repo
        .cleanup_expired(
            config.violation_retention_ms(),
            config.profile_history_window_ms(),
        )
        .await
    {
        Ok((counters, violations, activity)) => {
            tracing::info!(
                counters_deleted = counters,
                violations_deleted = violations,
                activity_deleted = activity,
                "Admission cleanup completed"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Admission cleanup failed, continuing anyway");
        }
    }

    match enforcement.cleanup_expired().await {
        Ok((deny, challenges, penalties)) => {
            tracing::info!(
                deny_deleted = deny,
                challenges_deleted = challenges,
                penalties_deleted = penalties,
                "Enforcement cleanup completed"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "Enforcement cleanup failed, continuing anyway");
        }
    }
}

fn spawn_cleanup_task(
    repo: Arc<PgAdmissionRepository>,
    enforcement: Arc<PgEnforcementRepository>,
    config: Arc<AdmissionConfig>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        interval.tick().await; // startup cleanup already ran
        loop {
            interval.tick().await;
            run_cleanup(&repo, &enforcement, &config).await;
        }
    });
}

/// Load the rule set from RULES_PATH (JSON list of rules) or fall back to
/// the built-in defaults
fn load_rules() -> anyhow::Result<RuleSet> {
    if let Ok(path) = env::var("RULES_PATH") {
        let raw = std::fs::read_to_string(&path)?;
        let rules: Vec<RateLimitRule> = serde_json::from_str(&raw)?;
        let set = RuleSet::new(rules)?;
        tracing::info!(path, "Rules loaded from file");
        return Ok(set);
    }
    Ok(default_rules()?)
}

fn default_rules() -> Result<RuleSet, admission::AdmissionError> {
    RuleSet::new(vec![
        RateLimitRule {
            name: "global-requests".to_string(),
            limit: 120,
            window_secs: 60,
            key_pattern: "global:{identity}".to_string(),
            scope: RuleScope::Global,
            algorithm: Algorithm::SlidingWindow,
        },
        RateLimitRule {
            name: "login-burst".to_string(),
            limit: 10,
            window_secs: 60,
            key_pattern: "login:{ip}".to_string(),
            scope: RuleScope::Endpoint("/api/auth/login".to_string()),
            algorithm: Algorithm::TokenBucket {
                bucket_size: Some(5.0),
                refill_rate: Some(0.2),
            },
        },
        RateLimitRule {
            name: "free-tier-hourly".to_string(),
            limit: 1_000,
            window_secs: 3_600,
            key_pattern: "tier:free:{identity}".to_string(),
            scope: RuleScope::Tier("free".to_string()),
            algorithm: Algorithm::FixedWindow,
        },
    ])
}
