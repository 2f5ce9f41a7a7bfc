use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::tenant::{Tenant, TenantId};

use super::outbox::{parse_timestamp, parse_u32};
use super::{RepositoryError, TenantRepository};
use crate::DbPool;

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantRepository for SqlTenantRepository {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, channel_number, daily_limit, api_token, active, created_at
             FROM tenant WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(tenant_from_row).transpose()
    }

    async fn find_by_channel_number(
        &self,
        channel_number: &str,
    ) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, channel_number, daily_limit, api_token, active, created_at
             FROM tenant WHERE channel_number = ?",
        )
        .bind(channel_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(tenant_from_row).transpose()
    }

    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tenant (id, name, channel_number, daily_limit, api_token, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                channel_number = excluded.channel_number,
                daily_limit = excluded.daily_limit,
                api_token = excluded.api_token,
                active = excluded.active",
        )
        .bind(&tenant.id.0)
        .bind(&tenant.name)
        .bind(&tenant.channel_number)
        .bind(i64::from(tenant.daily_limit))
        .bind(&tenant.api_token)
        .bind(tenant.active)
        .bind(tenant.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn tenant_from_row(row: SqliteRow) -> Result<Tenant, RepositoryError> {
    Ok(Tenant {
        id: TenantId(row.try_get("id")?),
        name: row.try_get("name")?,
        channel_number: row.try_get("channel_number")?,
        daily_limit: parse_u32("daily_limit", row.try_get("daily_limit")?)?,
        api_token: row.try_get("api_token")?,
        active: row.try_get("active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use courier_core::domain::tenant::{Tenant, TenantId};

    use super::SqlTenantRepository;
    use crate::repositories::tests_support::{parse_ts, setup_pool};
    use crate::repositories::TenantRepository;

    fn tenant(id: &str, channel_number: &str) -> Tenant {
        Tenant {
            id: TenantId(id.to_string()),
            name: format!("{id} Inc"),
            channel_number: channel_number.to_string(),
            daily_limit: 200,
            api_token: "token-abc".to_string(),
            active: true,
            created_at: parse_ts("2026-03-01T00:00:00Z"),
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlTenantRepository::new(pool.clone());
        let tenant = tenant("acme-tenant-rt", "+15550201");

        repo.save(tenant.clone()).await.expect("save tenant");

        let by_id = repo.find_by_id(&tenant.id).await.expect("find by id");
        assert_eq!(by_id, Some(tenant.clone()));

        let by_number =
            repo.find_by_channel_number("+15550201").await.expect("find by channel number");
        assert_eq!(by_number, Some(tenant));
        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_channel_number_resolves_to_none() {
        let pool = setup_pool().await;
        let repo = SqlTenantRepository::new(pool.clone());

        let found = repo.find_by_channel_number("+10000000").await.expect("lookup");
        assert!(found.is_none());
        pool.close().await;
    }
}
