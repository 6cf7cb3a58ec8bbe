//! Abuse Detection Module
//!
//! Clean Architecture structure:
//! - `domain/` - Detection results, enforcement actions, combination logic
//! - `application/` - Detector set, engine, response manager, sink service
//! - `infra/` - PostgreSQL and in-memory enforcement stores
//!
//! ## Detection Model
//! - Seven independent detectors each score 0..=10 for one threat pattern
//! - Combination keeps the **maximum** score and the union of indicators:
//!   one strong signal must dominate, never be averaged away
//! - A failing or slow detector contributes zero risk, annotated, without
//!   aborting its siblings
//! - Enforcement (deny list, challenge flags, penalties) is best-effort and
//!   consumed by the admission boundary through its probe port

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;

// Re-exports for convenience
pub use application::config::AbuseConfig;
pub use application::detectors::Detector;
pub use application::engine::AbuseDetectionEngine;
pub use application::respond::ResponseManager;
pub use application::service::AbuseService;
pub use domain::entities::{AbuseAnalysis, DetectionResult, EnforcementAction};
pub use error::{AbuseError, AbuseResult};
pub use infra::postgres::PgEnforcementRepository;
