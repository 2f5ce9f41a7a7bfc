use async_trait::async_trait;
use thiserror::Error;

use courier_core::chrono::{DateTime, Utc};
use courier_core::domain::conversation::{ConversationKey, ConversationPatch, ConversationState};
use courier_core::domain::outbox::{OutboxItem, OutboxItemId, OutboxStatus};
use courier_core::domain::quota::{QuotaDecision, QuotaSnapshot};
use courier_core::domain::tenant::{Tenant, TenantId};
use courier_core::domain::timeline::TimelineEvent;

pub mod conversation;
pub mod inbound;
pub mod memory;
pub mod outbox;
pub mod quota;
pub mod tenant;
pub mod timeline;

pub use conversation::SqlConversationRepository;
pub use inbound::SqlInboundEventRepository;
pub use memory::{
    InMemoryConversationRepository, InMemoryInboundEventRepository, InMemoryOutboxRepository,
    InMemoryQuotaRepository, InMemoryTenantRepository, InMemoryTimelineRepository,
};
pub use outbox::SqlOutboxRepository;
pub use quota::SqlQuotaRepository;
pub use tenant::SqlTenantRepository;
pub use timeline::SqlTimelineRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn insert(&self, item: OutboxItem) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError>;

    /// Queued items eligible to run at `now` (honoring `scheduled_not_before`),
    /// oldest first, optionally for a single tenant.
    async fn select_due(
        &self,
        tenant_id: Option<&TenantId>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxItem>, RepositoryError>;

    /// Atomic queued -> sending transition. Returns false when another
    /// runner already claimed the item.
    async fn claim(&self, id: &OutboxItemId, now: DateTime<Utc>) -> Result<bool, RepositoryError>;

    /// Writes back a claimed item's new status, attempts, and error fields.
    async fn save(&self, item: &OutboxItem) -> Result<(), RepositoryError>;

    /// Resets `sending` items claimed before `cutoff` back to `queued`,
    /// bounded by each item's attempts ceiling. Returns how many were
    /// reclaimed.
    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;

    async fn count_by_status(&self, status: OutboxStatus) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait QuotaRepository: Send + Sync {
    /// Reserves up to `desired` units of the tenant's daily budget at
    /// `when`, creating the day's row lazily with `limit`. Partial
    /// allowance: grants `min(desired, remaining)`.
    async fn reserve(
        &self,
        tenant_id: &TenantId,
        desired: u32,
        limit: u32,
        when: DateTime<Utc>,
    ) -> Result<QuotaDecision, RepositoryError>;

    async fn get_remaining(
        &self,
        tenant_id: &TenantId,
        limit: u32,
        when: DateTime<Utc>,
    ) -> Result<QuotaSnapshot, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn get(&self, key: &ConversationKey)
        -> Result<Option<ConversationState>, RepositoryError>;

    /// Upsert: creates the initial state when the key is unknown, then
    /// applies the patch.
    async fn update(
        &self,
        key: &ConversationKey,
        patch: ConversationPatch,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, RepositoryError>;
}

#[async_trait]
pub trait TimelineRepository: Send + Sync {
    async fn record(&self, event: TimelineEvent) -> Result<(), RepositoryError>;

    async fn list_for_entity(
        &self,
        tenant_id: &TenantId,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<TimelineEvent>, RepositoryError>;

    async fn list_by_correlation_id(
        &self,
        tenant_id: Option<&TenantId>,
        correlation_id: &str,
        limit: u32,
    ) -> Result<Vec<TimelineEvent>, RepositoryError>;
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError>;

    async fn find_by_channel_number(
        &self,
        channel_number: &str,
    ) -> Result<Option<Tenant>, RepositoryError>;

    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError>;
}

#[cfg(test)]
pub(crate) mod tests_support {
    use courier_core::chrono::{DateTime, Utc};
    use courier_core::domain::tenant::TenantId;

    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub async fn insert_tenant(pool: &DbPool, tenant_id: &TenantId) {
        sqlx::query(
            "INSERT INTO tenant (id, name, channel_number, daily_limit, api_token, active, created_at)
             VALUES (?, ?, ?, 100, 'token-test', 1, '2026-03-01T00:00:00Z')",
        )
        .bind(&tenant_id.0)
        .bind(format!("{} Inc", tenant_id.0))
        .bind(format!("+1555-{}", tenant_id.0))
        .execute(pool)
        .await
        .expect("insert tenant");
    }

    pub fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}

#[async_trait]
pub trait InboundEventRepository: Send + Sync {
    /// Durable idempotency for webhook replays: inserts the event id and
    /// returns true, or returns false when it was already recorded.
    async fn record_if_new(
        &self,
        provider_event_id: &str,
        tenant_id: &TenantId,
        payload_json: &str,
        received_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}
