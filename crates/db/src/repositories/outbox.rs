use courier_core::chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::outbox::{
    EntityRef, MessageOrigin, OutboxItem, OutboxItemId, OutboxStatus,
};
use courier_core::domain::tenant::TenantId;

use super::{OutboxRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOutboxRepository {
    pool: DbPool,
}

impl SqlOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const ITEM_COLUMNS: &str = "id,
    tenant_id,
    channel_instance,
    remote_party,
    payload_json,
    origin,
    entity_type,
    entity_id,
    correlation_id,
    status,
    attempts,
    max_attempts,
    created_at,
    last_attempt_at,
    claimed_at,
    last_error,
    scheduled_not_before";

#[async_trait::async_trait]
impl OutboxRepository for SqlOutboxRepository {
    async fn insert(&self, item: OutboxItem) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO outbox_item (
                id,
                tenant_id,
                channel_instance,
                remote_party,
                payload_json,
                origin,
                entity_type,
                entity_id,
                correlation_id,
                status,
                attempts,
                max_attempts,
                created_at,
                last_attempt_at,
                claimed_at,
                last_error,
                scheduled_not_before
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id.0)
        .bind(&item.tenant_id.0)
        .bind(&item.channel_instance)
        .bind(&item.remote_party)
        .bind(&item.payload_json)
        .bind(item.origin.as_str())
        .bind(item.entity.as_ref().map(|entity| entity.entity_type.as_str()))
        .bind(item.entity.as_ref().map(|entity| entity.entity_id.as_str()))
        .bind(&item.correlation_id)
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(i64::from(item.max_attempts))
        .bind(item.created_at.to_rfc3339())
        .bind(item.last_attempt_at.map(|value| value.to_rfc3339()))
        .bind(item.claimed_at.map(|value| value.to_rfc3339()))
        .bind(item.last_error.as_deref())
        .bind(item.scheduled_not_before.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM outbox_item WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(item_from_row).transpose()
    }

    async fn select_due(
        &self,
        tenant_id: Option<&TenantId>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxItem>, RepositoryError> {
        let now = now.to_rfc3339();
        let rows = if let Some(tenant_id) = tenant_id {
            sqlx::query(&format!(
                "SELECT {ITEM_COLUMNS} FROM outbox_item
                 WHERE status = 'queued'
                   AND tenant_id = ?
                   AND (scheduled_not_before IS NULL OR scheduled_not_before <= ?)
                 ORDER BY created_at ASC
                 LIMIT ?",
            ))
            .bind(&tenant_id.0)
            .bind(&now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {ITEM_COLUMNS} FROM outbox_item
                 WHERE status = 'queued'
                   AND (scheduled_not_before IS NULL OR scheduled_not_before <= ?)
                 ORDER BY created_at ASC
                 LIMIT ?",
            ))
            .bind(&now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(item_from_row).collect()
    }

    async fn claim(&self, id: &OutboxItemId, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        // The conditional update is the sole mutual-exclusion point between
        // concurrent runner processes.
        let result = sqlx::query(
            "UPDATE outbox_item
             SET status = 'sending', claimed_at = ?
             WHERE id = ? AND status = 'queued'",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save(&self, item: &OutboxItem) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE outbox_item
             SET status = ?,
                 attempts = ?,
                 last_attempt_at = ?,
                 claimed_at = ?,
                 last_error = ?,
                 scheduled_not_before = ?
             WHERE id = ?",
        )
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(item.last_attempt_at.map(|value| value.to_rfc3339()))
        .bind(item.claimed_at.map(|value| value.to_rfc3339()))
        .bind(item.last_error.as_deref())
        .bind(item.scheduled_not_before.map(|value| value.to_rfc3339()))
        .bind(&item.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE outbox_item
             SET status = 'queued', claimed_at = NULL
             WHERE status = 'sending'
               AND claimed_at IS NOT NULL
               AND claimed_at < ?
               AND attempts < max_attempts",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<i64, RepositoryError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM outbox_item WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

fn item_from_row(row: SqliteRow) -> Result<OutboxItem, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OutboxStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown outbox status `{status_raw}`")))?;

    let origin_raw = row.try_get::<String, _>("origin")?;
    let origin = MessageOrigin::parse(&origin_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown message origin `{origin_raw}`"))
    })?;

    let entity = match (
        row.try_get::<Option<String>, _>("entity_type")?,
        row.try_get::<Option<String>, _>("entity_id")?,
    ) {
        (Some(entity_type), Some(entity_id)) => Some(EntityRef { entity_type, entity_id }),
        (None, None) => None,
        _ => {
            return Err(RepositoryError::Decode(
                "entity_type and entity_id must be set together".to_string(),
            ))
        }
    };

    Ok(OutboxItem {
        id: OutboxItemId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        channel_instance: row.try_get("channel_instance")?,
        remote_party: row.try_get("remote_party")?,
        payload_json: row.try_get("payload_json")?,
        origin,
        entity,
        correlation_id: row.try_get("correlation_id")?,
        status,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        last_attempt_at: parse_optional_timestamp("last_attempt_at", row.try_get("last_attempt_at")?)?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        scheduled_not_before: parse_optional_timestamp(
            "scheduled_not_before",
            row.try_get("scheduled_not_before")?,
        )?,
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use courier_core::domain::outbox::{MessageOrigin, NewOutboxMessage, OutboxStatus};
    use courier_core::domain::tenant::TenantId;

    use super::SqlOutboxRepository;
    use crate::repositories::tests_support::{insert_tenant, parse_ts, setup_pool};
    use crate::repositories::OutboxRepository;

    fn queued_message(tenant_id: &TenantId, remote_party: &str) -> NewOutboxMessage {
        NewOutboxMessage {
            tenant_id: tenant_id.clone(),
            channel_instance: "channel-1".to_string(),
            remote_party: remote_party.to_string(),
            payload_json: "{\"text\":\"hello\"}".to_string(),
            origin: MessageOrigin::Automation,
            entity: None,
            correlation_id: "corr-1".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-roundtrip".to_string());
        insert_tenant(&pool, &tenant_id).await;

        let repo = SqlOutboxRepository::new(pool.clone());
        let item = queued_message(&tenant_id, "+15550100").into_item(5, parse_ts("2026-03-01T09:00:00Z"));

        repo.insert(item.clone()).await.expect("insert item");
        let found = repo.find_by_id(&item.id).await.expect("find item");

        assert_eq!(found, Some(item));
        pool.close().await;
    }

    #[tokio::test]
    async fn select_due_is_fifo_and_honors_schedule() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-fifo".to_string());
        insert_tenant(&pool, &tenant_id).await;

        let repo = SqlOutboxRepository::new(pool.clone());
        let now: DateTime<Utc> = parse_ts("2026-03-01T09:00:00Z");

        let older = queued_message(&tenant_id, "+15550101").into_item(5, now - Duration::minutes(5));
        let newer = queued_message(&tenant_id, "+15550102").into_item(5, now - Duration::minutes(1));
        let mut deferred = queued_message(&tenant_id, "+15550103").into_item(5, now - Duration::minutes(9));
        deferred.scheduled_not_before = Some(now + Duration::minutes(10));

        repo.insert(newer.clone()).await.expect("insert newer");
        repo.insert(older.clone()).await.expect("insert older");
        repo.insert(deferred).await.expect("insert deferred");

        let due = repo.select_due(Some(&tenant_id), 10, now).await.expect("select due");

        assert_eq!(
            due.iter().map(|item| item.remote_party.as_str()).collect::<Vec<_>>(),
            vec!["+15550101", "+15550102"]
        );
        pool.close().await;
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-claim".to_string());
        insert_tenant(&pool, &tenant_id).await;

        let repo = SqlOutboxRepository::new(pool.clone());
        let now = parse_ts("2026-03-01T09:00:00Z");
        let item = queued_message(&tenant_id, "+15550100").into_item(5, now);
        repo.insert(item.clone()).await.expect("insert item");

        let first = repo.claim(&item.id, now).await.expect("first claim");
        let second = repo.claim(&item.id, now).await.expect("second claim");

        assert!(first);
        assert!(!second);

        let stored = repo.find_by_id(&item.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, OutboxStatus::Sending);
        pool.close().await;
    }

    #[tokio::test]
    async fn stale_sending_items_are_reclaimed_up_to_the_attempts_ceiling() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-reclaim".to_string());
        insert_tenant(&pool, &tenant_id).await;

        let repo = SqlOutboxRepository::new(pool.clone());
        let claimed_at = parse_ts("2026-03-01T09:00:00Z");

        let stuck = queued_message(&tenant_id, "+15550101").into_item(5, claimed_at);
        repo.insert(stuck.clone()).await.expect("insert stuck");
        assert!(repo.claim(&stuck.id, claimed_at).await.expect("claim stuck"));

        let mut exhausted = queued_message(&tenant_id, "+15550102").into_item(2, claimed_at);
        exhausted.attempts = 2;
        repo.insert(exhausted.clone()).await.expect("insert exhausted");
        assert!(repo.claim(&exhausted.id, claimed_at).await.expect("claim exhausted"));

        let reclaimed =
            repo.reclaim_stale(claimed_at + Duration::minutes(1)).await.expect("reclaim");

        assert_eq!(reclaimed, 1);
        let stored = repo.find_by_id(&stuck.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, OutboxStatus::Queued);
        assert!(stored.claimed_at.is_none());

        let still_stuck = repo.find_by_id(&exhausted.id).await.expect("find").expect("exists");
        assert_eq!(still_stuck.status, OutboxStatus::Sending);
        pool.close().await;
    }

    #[tokio::test]
    async fn save_persists_terminal_status_and_error() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-save".to_string());
        insert_tenant(&pool, &tenant_id).await;

        let repo = SqlOutboxRepository::new(pool.clone());
        let now = parse_ts("2026-03-01T09:00:00Z");
        let mut item = queued_message(&tenant_id, "+15550100").into_item(5, now);
        repo.insert(item.clone()).await.expect("insert item");
        assert!(repo.claim(&item.id, now).await.expect("claim"));

        item.status = OutboxStatus::Skipped;
        item.last_error = Some("quota_exhausted".to_string());
        item.last_attempt_at = Some(now);
        repo.save(&item).await.expect("save item");

        let stored = repo.find_by_id(&item.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, OutboxStatus::Skipped);
        assert_eq!(stored.last_error.as_deref(), Some("quota_exhausted"));

        assert_eq!(repo.count_by_status(OutboxStatus::Skipped).await.expect("count"), 1);
        pool.close().await;
    }
}
