//! Admission Control Module
//!
//! Clean Architecture structure:
//! - `domain/` - Rules, counter algorithms, profiles, repository traits
//! - `application/` - Use cases: check, reload, behavior analysis, metrics
//! - `infra/` - PostgreSQL and in-memory implementations
//! - `presentation/` - HTTP handlers and the boundary middleware
//!
//! ## Decision Model
//! - Counter updates are atomic per key; racing checks never over-admit
//! - The counter store failing fails **open**: availability over strictness,
//!   logged and counted distinctly from normal allows
//! - Abuse analysis observes requests asynchronously and never blocks or
//!   fails the admission decision

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::behavior::BehaviorAnalyzer;
pub use application::check::CheckAdmissionUseCase;
pub use application::config::AdmissionConfig;
pub use application::metrics::Metrics;
pub use domain::outcome::AdmissionDecision;
pub use domain::request::AdmissionRequest;
pub use domain::rule::{Algorithm, RateLimitRule, RuleScope, RuleSet, RuleSetHandle};
pub use error::{AdmissionError, AdmissionResult};
pub use infra::postgres::PgAdmissionRepository;
pub use presentation::handlers::AdmissionAppState;
pub use presentation::router::admission_router;

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult, OptionExt, ResultExt},
    kind::ErrorKind,
};

#[cfg(test)]
mod tests;
