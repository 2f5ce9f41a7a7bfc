use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimelineEventId(pub String);

/// Coarse bucket for a status value, so dashboards can group without
/// knowing every entity's status vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusGroup {
    Progress,
    Success,
    Failure,
}

impl StatusGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "progress" => Some(Self::Progress),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// One append-only record in an entity's history. Never updated, never
/// deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: TimelineEventId,
    pub tenant_id: TenantId,
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    pub status_group: StatusGroup,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

impl TimelineEvent {
    pub fn new(
        tenant_id: TenantId,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        status: impl Into<String>,
        status_group: StatusGroup,
        actor: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TimelineEventId(Uuid::new_v4().to_string()),
            tenant_id,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            status: status.into(),
            status_group,
            actor: actor.into(),
            occurred_at,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{StatusGroup, TimelineEvent};
    use crate::domain::tenant::TenantId;

    #[test]
    fn builder_attaches_correlation_id() {
        let event = TimelineEvent::new(
            TenantId("acme".to_string()),
            "order",
            "order-7",
            "confirmed",
            StatusGroup::Success,
            "runner",
            Utc::now(),
        )
        .with_correlation_id("corr-9");

        assert_eq!(event.correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(event.entity_type, "order");
    }

    #[test]
    fn status_group_round_trips_through_strings() {
        for group in [StatusGroup::Progress, StatusGroup::Success, StatusGroup::Failure] {
            assert_eq!(StatusGroup::parse(group.as_str()), Some(group));
        }
        assert_eq!(StatusGroup::parse("bogus"), None);
    }
}
