//! Repository Traits
//!
//! Enforcement state written by the response manager. The admission crate
//! reads the same tables through its `EnforcementProbe` port.

use crate::error::AbuseResult;

/// Enforcement record writer
#[trait_variant::make(EnforcementRepository: Send)]
pub trait LocalEnforcementRepository {
    /// Put a key on the deny list until `expires_at_ms`
    async fn deny(&self, key: &str, reason: &str, expires_at_ms: i64) -> AbuseResult<()>;

    /// Require extra verification for a key until `expires_at_ms`
    async fn require_challenge(&self, key: &str, reason: &str, expires_at_ms: i64)
    -> AbuseResult<()>;

    /// Apply a temporary limit penalty (factor in [0, 1]) to a key
    async fn apply_penalty(
        &self,
        key: &str,
        factor: f64,
        reason: &str,
        expires_at_ms: i64,
    ) -> AbuseResult<()>;
}

/// Deny-list and flag keys carry a kind prefix so an identity can never
/// collide with an IP literal
pub fn identity_key(identity: &str) -> String {
    format!("identity:{identity}")
}

pub fn ip_key(ip: &str) -> String {
    format!("ip:{ip}")
}
