use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutboxItemId(pub String);

impl std::fmt::Display for OutboxItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Queued,
    Sending,
    Sent,
    Failed,
    Skipped,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Skipped)
    }
}

/// Who put the message into the outbox. Handoff gating only applies to
/// automation-originated messages; an operator typing into a handed-off
/// conversation must still go out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Automation,
    Operator,
}

impl MessageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automation => "automation",
            Self::Operator => "operator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "automation" => Some(Self::Automation),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }
}

/// Business entity a message is attached to, for timeline recording.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: OutboxItemId,
    pub tenant_id: TenantId,
    pub channel_instance: String,
    pub remote_party: String,
    pub payload_json: String,
    pub origin: MessageOrigin,
    pub entity: Option<EntityRef>,
    pub correlation_id: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scheduled_not_before: Option<DateTime<Utc>>,
}

/// Validated input for `enqueue`. Construction is the synchronous validation
/// gate: malformed messages never reach the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOutboxMessage {
    pub tenant_id: TenantId,
    pub channel_instance: String,
    pub remote_party: String,
    pub payload_json: String,
    pub origin: MessageOrigin,
    pub entity: Option<EntityRef>,
    pub correlation_id: String,
}

impl NewOutboxMessage {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.remote_party.trim().is_empty() {
            return Err(DomainError::Validation("remote_party must not be empty".to_string()));
        }
        if self.payload_json.trim().is_empty() {
            return Err(DomainError::Validation("payload must not be empty".to_string()));
        }
        if self.channel_instance.trim().is_empty() {
            return Err(DomainError::Validation(
                "channel_instance must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn into_item(self, max_attempts: u32, now: DateTime<Utc>) -> OutboxItem {
        OutboxItem {
            id: OutboxItemId(Uuid::new_v4().to_string()),
            tenant_id: self.tenant_id,
            channel_instance: self.channel_instance,
            remote_party: self.remote_party,
            payload_json: self.payload_json,
            origin: self.origin,
            entity: self.entity,
            correlation_id: self.correlation_id,
            status: OutboxStatus::Queued,
            attempts: 0,
            max_attempts,
            created_at: now,
            last_attempt_at: None,
            claimed_at: None,
            last_error: None,
            scheduled_not_before: None,
        }
    }
}

/// Reason a drained item was skipped rather than sent. Stored verbatim in
/// `last_error` so operators can filter on it.
pub const SKIP_QUOTA_EXHAUSTED: &str = "quota_exhausted";
pub const SKIP_HANDOFF_ACTIVE: &str = "handoff_active";
