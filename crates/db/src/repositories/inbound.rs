use courier_core::chrono::{DateTime, Utc};

use courier_core::domain::tenant::TenantId;

use super::{InboundEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInboundEventRepository {
    pool: DbPool,
}

impl SqlInboundEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InboundEventRepository for SqlInboundEventRepository {
    async fn record_if_new(
        &self,
        provider_event_id: &str,
        tenant_id: &TenantId,
        payload_json: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        // The primary key on provider_event_id is the authoritative replay
        // defense; the in-memory guard only fronts it.
        let result = sqlx::query(
            "INSERT OR IGNORE INTO inbound_event (
                provider_event_id, tenant_id, payload_json, received_at
             ) VALUES (?, ?, ?, ?)",
        )
        .bind(provider_event_id)
        .bind(&tenant_id.0)
        .bind(payload_json)
        .bind(received_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use courier_core::domain::tenant::TenantId;

    use super::SqlInboundEventRepository;
    use crate::repositories::tests_support::{insert_tenant, parse_ts, setup_pool};
    use crate::repositories::InboundEventRepository;

    #[tokio::test]
    async fn replayed_event_ids_are_rejected_durably() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-inbound".to_string());
        insert_tenant(&pool, &tenant_id).await;

        let repo = SqlInboundEventRepository::new(pool.clone());
        let received_at = parse_ts("2026-03-01T10:00:00Z");

        let first = repo
            .record_if_new("wamid.inbound-1", &tenant_id, "{}", received_at)
            .await
            .expect("first record");
        let replay = repo
            .record_if_new("wamid.inbound-1", &tenant_id, "{}", received_at)
            .await
            .expect("replayed record");
        let other = repo
            .record_if_new("wamid.inbound-2", &tenant_id, "{}", received_at)
            .await
            .expect("other record");

        assert!(first);
        assert!(!replay);
        assert!(other);
        pool.close().await;
    }
}
