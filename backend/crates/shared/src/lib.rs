//! Shared Kernel - Domain-crossing minimal core
//!
//! This crate contains the "smallest core" of domain vocabulary:
//! - Unified error types and result aliases (including the 429
//!   `Retry-After` carrier used by the admission boundary)
//! - Common primitive value objects (typed IDs for violations and
//!   security incidents)
//!
//! **Design Principle**: Only include things that are "hard to change"
//! and have consistent meaning across all domains.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;
