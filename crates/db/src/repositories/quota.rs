use courier_core::chrono::{DateTime, Utc};
use sqlx::Row;

use courier_core::domain::quota::{admit, QuotaDay, QuotaDecision, QuotaSnapshot};
use courier_core::domain::tenant::TenantId;

use super::outbox::parse_u32;
use super::{QuotaRepository, RepositoryError};
use crate::DbPool;

pub struct SqlQuotaRepository {
    pool: DbPool,
}

impl SqlQuotaRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl QuotaRepository for SqlQuotaRepository {
    async fn reserve(
        &self,
        tenant_id: &TenantId,
        desired: u32,
        limit: u32,
        when: DateTime<Utc>,
    ) -> Result<QuotaDecision, RepositoryError> {
        let day = QuotaDay::from_timestamp(when);

        // Read-modify-write inside one write transaction. SQLite serializes
        // writers, so two runners reserving for the same (tenant, day)
        // cannot both observe the stale counter and jointly overshoot.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO daily_quota (tenant_id, day, used, quota_limit)
             VALUES (?, ?, 0, ?)
             ON CONFLICT(tenant_id, day) DO NOTHING",
        )
        .bind(&tenant_id.0)
        .bind(&day.0)
        .bind(i64::from(limit))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "SELECT used, quota_limit FROM daily_quota WHERE tenant_id = ? AND day = ?",
        )
        .bind(&tenant_id.0)
        .bind(&day.0)
        .fetch_one(&mut *tx)
        .await?;

        let used = parse_u32("used", row.try_get("used")?)?;
        let limit = parse_u32("quota_limit", row.try_get("quota_limit")?)?;
        let decision = admit(used, limit, desired);

        sqlx::query("UPDATE daily_quota SET used = ? WHERE tenant_id = ? AND day = ?")
            .bind(i64::from(decision.used_after))
            .bind(&tenant_id.0)
            .bind(&day.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(decision)
    }

    async fn get_remaining(
        &self,
        tenant_id: &TenantId,
        limit: u32,
        when: DateTime<Utc>,
    ) -> Result<QuotaSnapshot, RepositoryError> {
        let day = QuotaDay::from_timestamp(when);
        let row = sqlx::query(
            "SELECT used, quota_limit FROM daily_quota WHERE tenant_id = ? AND day = ?",
        )
        .bind(&tenant_id.0)
        .bind(&day.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let used = parse_u32("used", row.try_get("used")?)?;
                let limit = parse_u32("quota_limit", row.try_get("quota_limit")?)?;
                Ok(QuotaSnapshot::new(limit, used))
            }
            None => Ok(QuotaSnapshot::new(limit, 0)),
        }
    }
}
