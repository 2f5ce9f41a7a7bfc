use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Schema objects an admin diagnostic expects to find. Kept in one place so
/// the presence check and the migration test agree.
pub const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
    "tenant",
    "outbox_item",
    "daily_quota",
    "conversation_state",
    "timeline_event",
    "inbound_event",
    "idx_outbox_item_status_created_at",
    "idx_outbox_item_tenant_status",
    "idx_timeline_event_entity",
    "idx_timeline_event_correlation",
    "idx_inbound_event_tenant",
];

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{run_pending, MANAGED_SCHEMA_OBJECTS};
    use crate::connect_with_settings;

    #[tokio::test]
    async fn migrations_create_the_managed_schema() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected schema object `{object}` to exist");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");
        pool.close().await;
    }
}
