//! PostgreSQL Repository Implementations
//!
//! Counter atomicity comes from a row lock: the read-modify-write for one
//! key runs inside a transaction holding `SELECT ... FOR UPDATE`, so the
//! store serializes concurrent checks per key.

use chrono::Utc;
use sqlx::PgPool;

use crate::domain::counter::{self, RuleCheckOutcome};
use crate::domain::outcome::Violation;
use crate::domain::profile::{AccountInfo, RequestActivity};
use crate::domain::repository::{
    AccountRepository, ActivityRepository, CounterStore, ViolationRepository,
};
use crate::domain::rule::EffectiveRule;
use crate::error::AdmissionResult;

/// PostgreSQL-backed repository
#[derive(Clone)]
pub struct PgAdmissionRepository {
    pool: PgPool,
}

impl PgAdmissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Clean up expired counters, aged violations and aged activity
    pub async fn cleanup_expired(
        &self,
        violation_retention_ms: i64,
        activity_retention_ms: i64,
    ) -> AdmissionResult<(u64, u64, u64)> {
        let now_ms = Utc::now().timestamp_millis();

        let counters_deleted =
            sqlx::query("DELETE FROM admission_counters WHERE expires_at_ms < $1")
                .bind(now_ms)
                .execute(&self.pool)
                .await?
                .rows_affected();

        let violations_deleted =
            sqlx::query("DELETE FROM admission_violations WHERE occurred_at_ms < $1")
                .bind(now_ms - violation_retention_ms)
                .execute(&self.pool)
                .await?
                .rows_affected();

        let activity_deleted =
            sqlx::query("DELETE FROM request_activity WHERE occurred_at_ms < $1")
                .bind(now_ms - activity_retention_ms)
                .execute(&self.pool)
                .await?
                .rows_affected();

        tracing::info!(
            counters = counters_deleted,
            violations = violations_deleted,
            activity = activity_deleted,
            "Cleaned up expired admission data"
        );

        Ok((counters_deleted, violations_deleted, activity_deleted))
    }
}

impl CounterStore for PgAdmissionRepository {
    async fn check_and_update(
        &self,
        key: &str,
        rule: &EffectiveRule,
        now_ms: i64,
    ) -> AdmissionResult<RuleCheckOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (serde_json::Value, i64)>(
            "SELECT state, expires_at_ms FROM admission_counters WHERE counter_key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        // Expired-but-not-yet-evicted state reads as empty
        let state = row.and_then(|(value, expires_at_ms)| {
            if expires_at_ms > now_ms {
                serde_json::from_value(value).ok()
            } else {
                None
            }
        });

        let (new_state, outcome) = counter::check(state, rule, now_ms);

        sqlx::query(
            r#"
            INSERT INTO admission_counters (counter_key, state, expires_at_ms)
            VALUES ($1, $2, $3)
            ON CONFLICT (counter_key)
            DO UPDATE SET state = EXCLUDED.state, expires_at_ms = EXCLUDED.expires_at_ms
            "#,
        )
        .bind(key)
        .bind(serde_json::to_value(&new_state)?)
        .bind(counter::expiry_for(rule, now_ms))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(outcome)
    }
}

impl ViolationRepository for PgAdmissionRepository {
    async fn record(&self, violation: &Violation) -> AdmissionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admission_violations (
                violation_id,
                occurred_at_ms,
                identity,
                client_ip,
                endpoint,
                rule_name,
                current_count,
                limit_count,
                reason
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(violation.id.into_uuid())
        .bind(violation.occurred_at_ms)
        .bind(&violation.identity)
        .bind(violation.ip.to_string())
        .bind(&violation.endpoint)
        .bind(&violation.rule_name)
        .bind(violation.current as i64)
        .bind(violation.limit as i64)
        .bind(&violation.reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_count(&self, identity: &str, since_ms: i64) -> AdmissionResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM admission_violations WHERE identity = $1 AND occurred_at_ms >= $2",
        )
        .bind(identity)
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

impl ActivityRepository for PgAdmissionRepository {
    async fn record(&self, activity: &RequestActivity) -> AdmissionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO request_activity (
                identity,
                occurred_at_ms,
                endpoint,
                client_ip,
                user_agent_hash,
                success
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&activity.identity)
        .bind(activity.occurred_at_ms)
        .bind(&activity.endpoint)
        .bind(activity.ip.map(|ip| ip.to_string()))
        .bind(activity.user_agent_hash.as_deref())
        .bind(activity.success)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(
        &self,
        identity: &str,
        since_ms: i64,
        limit: u32,
    ) -> AdmissionResult<Vec<RequestActivity>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r#"
            SELECT identity, occurred_at_ms, endpoint, client_ip, user_agent_hash, success
            FROM request_activity
            WHERE identity = $1 AND occurred_at_ms >= $2
            ORDER BY occurred_at_ms DESC
            LIMIT $3
            "#,
        )
        .bind(identity)
        .bind(since_ms)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // Oldest first for gap analysis
        let mut activity: Vec<RequestActivity> =
            rows.into_iter().map(ActivityRow::into_activity).collect();
        activity.reverse();
        Ok(activity)
    }
}

impl AccountRepository for PgAdmissionRepository {
    async fn account_info(&self, identity: &str) -> AdmissionResult<Option<AccountInfo>> {
        let row = sqlx::query_as::<_, (chrono::DateTime<Utc>, bool)>(
            "SELECT created_at, mfa_enabled FROM accounts WHERE identity = $1",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(created_at, mfa_enabled)| AccountInfo {
            created_at_ms: created_at.timestamp_millis(),
            mfa_enabled,
        }))
    }

    async fn incident_count(&self, identity: &str, since_ms: i64) -> AdmissionResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM security_incidents WHERE identity = $1 AND occurred_at_ms >= $2",
        )
        .bind(identity)
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

// Internal row types for sqlx mapping
#[derive(sqlx::FromRow)]
struct ActivityRow {
    identity: String,
    occurred_at_ms: i64,
    endpoint: String,
    client_ip: Option<String>,
    user_agent_hash: Option<Vec<u8>>,
    success: bool,
}

impl ActivityRow {
    fn into_activity(self) -> RequestActivity {
        RequestActivity {
            identity: self.identity,
            occurred_at_ms: self.occurred_at_ms,
            endpoint: self.endpoint,
            ip: self.client_ip.and_then(|s| s.parse().ok()),
            user_agent_hash: self.user_agent_hash,
            success: self.success,
        }
    }
}
