use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;

/// Conversation identity: the triple of tenant, channel instance, and the
/// remote party's address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub tenant_id: TenantId,
    pub channel_instance: String,
    pub remote_party: String,
}

/// Opaque automation phase. The core stores and returns it without
/// interpreting the value; the schema version keeps forward compatibility
/// explicit when the automation logic reshapes its phase vocabulary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTag {
    pub value: String,
    pub schema_version: u32,
}

impl PhaseTag {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), schema_version: 1 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub key: ConversationKey,
    pub phase: PhaseTag,
    /// When true a human operator owns the conversation and automated sends
    /// are suppressed. Read fresh on every drain cycle.
    pub handoff_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn initial(key: ConversationKey, now: DateTime<Utc>) -> Self {
        Self { key, phase: PhaseTag::new("greeting"), handoff_active: false, updated_at: now }
    }
}

/// Partial update applied by `update` (upsert). Absent fields are left as
/// they are.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    pub phase: Option<PhaseTag>,
    pub handoff_active: Option<bool>,
}

impl ConversationState {
    pub fn apply(&mut self, patch: ConversationPatch, now: DateTime<Utc>) {
        if let Some(phase) = patch.phase {
            self.phase = phase;
        }
        if let Some(handoff_active) = patch.handoff_active {
            self.handoff_active = handoff_active;
        }
        self.updated_at = now;
    }
}
