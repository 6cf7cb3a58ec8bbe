//! PostgreSQL Repository Implementations
//!
//! One repository serves both sides of the enforcement tables: the abuse
//! responder writes through `EnforcementRepository`, the admission boundary
//! reads through its `EnforcementProbe` port.

use chrono::Utc;
use sqlx::PgPool;

use admission::domain::repository::{EnforcementProbe, PenaltyFactor};
use admission::error::AdmissionResult;

use crate::domain::repository::{EnforcementRepository, identity_key, ip_key};
use crate::error::AbuseResult;

/// PostgreSQL-backed enforcement store
#[derive(Clone)]
pub struct PgEnforcementRepository {
    pool: PgPool,
}

impl PgEnforcementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Clean up expired enforcement records
    pub async fn cleanup_expired(&self) -> AbuseResult<(u64, u64, u64)> {
        let now_ms = Utc::now().timestamp_millis();

        let deny_deleted = sqlx::query("DELETE FROM abuse_deny_list WHERE expires_at_ms < $1")
            .bind(now_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let challenges_deleted =
            sqlx::query("DELETE FROM abuse_challenge_flags WHERE expires_at_ms < $1")
                .bind(now_ms)
                .execute(&self.pool)
                .await?
                .rows_affected();

        let penalties_deleted = sqlx::query("DELETE FROM abuse_penalties WHERE expires_at_ms < $1")
            .bind(now_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::info!(
            deny = deny_deleted,
            challenges = challenges_deleted,
            penalties = penalties_deleted,
            "Cleaned up expired enforcement data"
        );

        Ok((deny_deleted, challenges_deleted, penalties_deleted))
    }
}

impl EnforcementRepository for PgEnforcementRepository {
    async fn deny(&self, key: &str, reason: &str, expires_at_ms: i64) -> AbuseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO abuse_deny_list (deny_key, reason, expires_at_ms)
            VALUES ($1, $2, $3)
            ON CONFLICT (deny_key)
            DO UPDATE SET reason = EXCLUDED.reason,
                          expires_at_ms = GREATEST(abuse_deny_list.expires_at_ms, EXCLUDED.expires_at_ms)
            "#,
        )
        .bind(key)
        .bind(reason)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn require_challenge(
        &self,
        key: &str,
        reason: &str,
        expires_at_ms: i64,
    ) -> AbuseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO abuse_challenge_flags (flag_key, reason, expires_at_ms)
            VALUES ($1, $2, $3)
            ON CONFLICT (flag_key)
            DO UPDATE SET reason = EXCLUDED.reason,
                          expires_at_ms = GREATEST(abuse_challenge_flags.expires_at_ms, EXCLUDED.expires_at_ms)
            "#,
        )
        .bind(key)
        .bind(reason)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_penalty(
        &self,
        key: &str,
        factor: f64,
        reason: &str,
        expires_at_ms: i64,
    ) -> AbuseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO abuse_penalties (penalty_key, factor, reason, expires_at_ms)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (penalty_key)
            DO UPDATE SET factor = LEAST(abuse_penalties.factor, EXCLUDED.factor),
                          reason = EXCLUDED.reason,
                          expires_at_ms = GREATEST(abuse_penalties.expires_at_ms, EXCLUDED.expires_at_ms)
            "#,
        )
        .bind(key)
        .bind(factor.clamp(0.0, 1.0))
        .bind(reason)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl EnforcementProbe for PgEnforcementRepository {
    async fn denied_reason(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<Option<String>> {
        let reason = sqlx::query_scalar::<_, String>(
            r#"
            SELECT reason FROM abuse_deny_list
            WHERE deny_key IN ($1, $2) AND expires_at_ms > $3
            LIMIT 1
            "#,
        )
        .bind(identity_key(identity))
        .bind(ip_key(ip))
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reason)
    }

    async fn challenge_required(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM abuse_challenge_flags
                WHERE flag_key IN ($1, $2) AND expires_at_ms > $3
            )
            "#,
        )
        .bind(identity_key(identity))
        .bind(ip_key(ip))
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn active_penalty(
        &self,
        identity: &str,
        ip: &str,
        now_ms: i64,
    ) -> AdmissionResult<Option<PenaltyFactor>> {
        // Strictest (lowest factor) penalty wins when both keys match
        let row = sqlx::query_as::<_, (f64, String, i64)>(
            r#"
            SELECT factor, reason, expires_at_ms FROM abuse_penalties
            WHERE penalty_key IN ($1, $2) AND expires_at_ms > $3
            ORDER BY factor ASC
            LIMIT 1
            "#,
        )
        .bind(identity_key(identity))
        .bind(ip_key(ip))
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(factor, reason, expires_at_ms)| PenaltyFactor {
            factor,
            reason,
            expires_at_ms,
        }))
    }
}
