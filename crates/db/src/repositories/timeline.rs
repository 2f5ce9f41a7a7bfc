use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::tenant::TenantId;
use courier_core::domain::timeline::{StatusGroup, TimelineEvent, TimelineEventId};

use super::outbox::parse_timestamp;
use super::{RepositoryError, TimelineRepository};
use crate::DbPool;

pub struct SqlTimelineRepository {
    pool: DbPool,
}

impl SqlTimelineRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TimelineRepository for SqlTimelineRepository {
    async fn record(&self, event: TimelineEvent) -> Result<(), RepositoryError> {
        // Append only: there is deliberately no UPDATE or DELETE path.
        sqlx::query(
            "INSERT INTO timeline_event (
                id, tenant_id, entity_type, entity_id, status, status_group, actor,
                occurred_at, correlation_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id.0)
        .bind(&event.tenant_id.0)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(&event.status)
        .bind(event.status_group.as_str())
        .bind(&event.actor)
        .bind(event.occurred_at.to_rfc3339())
        .bind(event.correlation_id.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_entity(
        &self,
        tenant_id: &TenantId,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<TimelineEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, entity_type, entity_id, status, status_group, actor,
                    occurred_at, correlation_id
             FROM timeline_event
             WHERE tenant_id = ? AND entity_type = ? AND entity_id = ?
             ORDER BY occurred_at ASC, seq ASC",
        )
        .bind(&tenant_id.0)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }

    async fn list_by_correlation_id(
        &self,
        tenant_id: Option<&TenantId>,
        correlation_id: &str,
        limit: u32,
    ) -> Result<Vec<TimelineEvent>, RepositoryError> {
        let rows = if let Some(tenant_id) = tenant_id {
            sqlx::query(
                "SELECT id, tenant_id, entity_type, entity_id, status, status_group, actor,
                        occurred_at, correlation_id
                 FROM timeline_event
                 WHERE tenant_id = ? AND correlation_id = ?
                 ORDER BY occurred_at ASC, seq ASC
                 LIMIT ?",
            )
            .bind(&tenant_id.0)
            .bind(correlation_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, tenant_id, entity_type, entity_id, status, status_group, actor,
                        occurred_at, correlation_id
                 FROM timeline_event
                 WHERE correlation_id = ?
                 ORDER BY occurred_at ASC, seq ASC
                 LIMIT ?",
            )
            .bind(correlation_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<TimelineEvent, RepositoryError> {
    let group_raw = row.try_get::<String, _>("status_group")?;
    let status_group = StatusGroup::parse(&group_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status group `{group_raw}`")))?;

    Ok(TimelineEvent {
        id: TimelineEventId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        status: row.try_get("status")?,
        status_group,
        actor: row.try_get("actor")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
        correlation_id: row.try_get("correlation_id")?,
    })
}

#[cfg(test)]
mod tests {
    use courier_core::domain::tenant::TenantId;
    use courier_core::domain::timeline::{StatusGroup, TimelineEvent};

    use super::SqlTimelineRepository;
    use crate::repositories::tests_support::{insert_tenant, parse_ts, setup_pool};
    use crate::repositories::TimelineRepository;

    fn event(tenant_id: &TenantId, status: &str, at: &str) -> TimelineEvent {
        TimelineEvent::new(
            tenant_id.clone(),
            "order",
            "order-1",
            status,
            StatusGroup::Progress,
            "runner",
            parse_ts(at),
        )
        .with_correlation_id("corr-timeline")
    }

    #[tokio::test]
    async fn events_come_back_in_occurrence_order() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-timeline-order".to_string());
        insert_tenant(&pool, &tenant_id).await;

        let repo = SqlTimelineRepository::new(pool.clone());
        repo.record(event(&tenant_id, "confirmed", "2026-03-01T10:05:00Z")).await.expect("record");
        repo.record(event(&tenant_id, "created", "2026-03-01T10:00:00Z")).await.expect("record");
        repo.record(event(&tenant_id, "shipped", "2026-03-01T10:10:00Z")).await.expect("record");

        let events =
            repo.list_for_entity(&tenant_id, "order", "order-1").await.expect("list events");

        assert_eq!(
            events.iter().map(|event| event.status.as_str()).collect::<Vec<_>>(),
            vec!["created", "confirmed", "shipped"]
        );

        // A second read returns the same sequence untouched.
        let again = repo.list_for_entity(&tenant_id, "order", "order-1").await.expect("re-list");
        assert_eq!(events, again);
        pool.close().await;
    }

    #[tokio::test]
    async fn correlation_lookup_filters_by_tenant_and_respects_the_limit() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-timeline-corr".to_string());
        let other_tenant = TenantId("acme-timeline-corr2".to_string());
        insert_tenant(&pool, &tenant_id).await;
        insert_tenant(&pool, &other_tenant).await;

        let repo = SqlTimelineRepository::new(pool.clone());
        repo.record(event(&tenant_id, "created", "2026-03-01T10:00:00Z")).await.expect("record");
        repo.record(event(&tenant_id, "confirmed", "2026-03-01T10:01:00Z")).await.expect("record");
        repo.record(event(&other_tenant, "created", "2026-03-01T10:02:00Z")).await.expect("record");

        let scoped = repo
            .list_by_correlation_id(Some(&tenant_id), "corr-timeline", 10)
            .await
            .expect("scoped list");
        assert_eq!(scoped.len(), 2);
        assert!(scoped.iter().all(|event| event.tenant_id == tenant_id));

        let capped = repo
            .list_by_correlation_id(None, "corr-timeline", 1)
            .await
            .expect("capped list");
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].status, "created");
        pool.close().await;
    }

    #[tokio::test]
    async fn events_for_an_unknown_entity_are_empty() {
        let pool = setup_pool().await;
        let tenant_id = TenantId("acme-timeline-empty".to_string());
        insert_tenant(&pool, &tenant_id).await;

        let repo = SqlTimelineRepository::new(pool.clone());
        let events =
            repo.list_for_entity(&tenant_id, "booking", "missing").await.expect("list events");
        assert!(events.is_empty());
        pool.close().await;
    }
}
