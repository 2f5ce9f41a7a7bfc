use courier_core::chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::conversation::{
    ConversationKey, ConversationPatch, ConversationState, PhaseTag,
};
use courier_core::domain::tenant::TenantId;

use super::outbox::{parse_timestamp, parse_u32};
use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn get(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT tenant_id, channel_instance, remote_party, phase, phase_schema_version,
                    handoff_active, updated_at
             FROM conversation_state
             WHERE tenant_id = ? AND channel_instance = ? AND remote_party = ?",
        )
        .bind(&key.tenant_id.0)
        .bind(&key.channel_instance)
        .bind(&key.remote_party)
        .fetch_optional(&self.pool)
        .await?;

        row.map(state_from_row).transpose()
    }

    async fn update(
        &self,
        key: &ConversationKey,
        patch: ConversationPatch,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, RepositoryError> {
        let mut state = self
            .get(key)
            .await?
            .unwrap_or_else(|| ConversationState::initial(key.clone(), now));
        state.apply(patch, now);

        sqlx::query(
            "INSERT INTO conversation_state (
                tenant_id, channel_instance, remote_party, phase, phase_schema_version,
                handoff_active, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, channel_instance, remote_party) DO UPDATE SET
                phase = excluded.phase,
                phase_schema_version = excluded.phase_schema_version,
                handoff_active = excluded.handoff_active,
                updated_at = excluded.updated_at",
        )
        .bind(&key.tenant_id.0)
        .bind(&key.channel_instance)
        .bind(&key.remote_party)
        .bind(&state.phase.value)
        .bind(i64::from(state.phase.schema_version))
        .bind(state.handoff_active)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(state)
    }
}

fn state_from_row(row: SqliteRow) -> Result<ConversationState, RepositoryError> {
    Ok(ConversationState {
        key: ConversationKey {
            tenant_id: TenantId(row.try_get("tenant_id")?),
            channel_instance: row.try_get("channel_instance")?,
            remote_party: row.try_get("remote_party")?,
        },
        phase: PhaseTag {
            value: row.try_get("phase")?,
            schema_version: parse_u32(
                "phase_schema_version",
                row.try_get("phase_schema_version")?,
            )?,
        },
        handoff_active: row.try_get("handoff_active")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
