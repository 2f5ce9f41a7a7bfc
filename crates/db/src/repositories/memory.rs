use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use courier_core::chrono::{DateTime, Utc};
use courier_core::domain::conversation::{ConversationKey, ConversationPatch, ConversationState};
use courier_core::domain::outbox::{OutboxItem, OutboxItemId, OutboxStatus};
use courier_core::domain::quota::{admit, QuotaDay, QuotaDecision, QuotaSnapshot};
use courier_core::domain::tenant::{Tenant, TenantId};
use courier_core::domain::timeline::TimelineEvent;

use super::{
    ConversationRepository, InboundEventRepository, OutboxRepository, QuotaRepository,
    RepositoryError, TenantRepository, TimelineRepository,
};

/// Test doubles for the SQL repositories. The claim path takes the write
/// lock for the whole check-and-set so it matches the exclusivity the
/// conditional SQL update provides.
#[derive(Default)]
pub struct InMemoryOutboxRepository {
    items: RwLock<HashMap<String, OutboxItem>>,
}

#[async_trait::async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn insert(&self, item: OutboxItem) -> Result<(), RepositoryError> {
        let mut items = self.items.write().await;
        items.insert(item.id.0.clone(), item);
        Ok(())
    }

    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError> {
        let items = self.items.read().await;
        Ok(items.get(&id.0).cloned())
    }

    async fn select_due(
        &self,
        tenant_id: Option<&TenantId>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxItem>, RepositoryError> {
        let items = self.items.read().await;
        let mut due: Vec<OutboxItem> = items
            .values()
            .filter(|item| item.status == OutboxStatus::Queued)
            .filter(|item| tenant_id.map(|tenant| &item.tenant_id == tenant).unwrap_or(true))
            .filter(|item| {
                item.scheduled_not_before.map(|not_before| not_before <= now).unwrap_or(true)
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim(&self, id: &OutboxItemId, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut items = self.items.write().await;
        match items.get_mut(&id.0) {
            Some(item) if item.status == OutboxStatus::Queued => {
                item.status = OutboxStatus::Sending;
                item.claimed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save(&self, item: &OutboxItem) -> Result<(), RepositoryError> {
        let mut items = self.items.write().await;
        items.insert(item.id.0.clone(), item.clone());
        Ok(())
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut items = self.items.write().await;
        let mut reclaimed = 0;
        for item in items.values_mut() {
            let stale = item.status == OutboxStatus::Sending
                && item.claimed_at.map(|claimed| claimed < cutoff).unwrap_or(false)
                && item.attempts < item.max_attempts;
            if stale {
                item.status = OutboxStatus::Queued;
                item.claimed_at = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn count_by_status(&self, status: OutboxStatus) -> Result<i64, RepositoryError> {
        let items = self.items.read().await;
        Ok(items.values().filter(|item| item.status == status).count() as i64)
    }
}

#[derive(Default)]
pub struct InMemoryQuotaRepository {
    records: RwLock<HashMap<(String, String), (u32, u32)>>,
}

#[async_trait::async_trait]
impl QuotaRepository for InMemoryQuotaRepository {
    async fn reserve(
        &self,
        tenant_id: &TenantId,
        desired: u32,
        limit: u32,
        when: DateTime<Utc>,
    ) -> Result<QuotaDecision, RepositoryError> {
        let day = QuotaDay::from_timestamp(when);
        let mut records = self.records.write().await;
        let entry = records.entry((tenant_id.0.clone(), day.0)).or_insert((0, limit));
        let decision = admit(entry.0, entry.1, desired);
        entry.0 = decision.used_after;
        Ok(decision)
    }

    async fn get_remaining(
        &self,
        tenant_id: &TenantId,
        limit: u32,
        when: DateTime<Utc>,
    ) -> Result<QuotaSnapshot, RepositoryError> {
        let day = QuotaDay::from_timestamp(when);
        let records = self.records.read().await;
        match records.get(&(tenant_id.0.clone(), day.0)) {
            Some((used, limit)) => Ok(QuotaSnapshot::new(*limit, *used)),
            None => Ok(QuotaSnapshot::new(limit, 0)),
        }
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    states: RwLock<HashMap<(String, String, String), ConversationState>>,
}

fn conversation_map_key(key: &ConversationKey) -> (String, String, String) {
    (key.tenant_id.0.clone(), key.channel_instance.clone(), key.remote_party.clone())
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn get(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let states = self.states.read().await;
        Ok(states.get(&conversation_map_key(key)).cloned())
    }

    async fn update(
        &self,
        key: &ConversationKey,
        patch: ConversationPatch,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, RepositoryError> {
        let mut states = self.states.write().await;
        let state = states
            .entry(conversation_map_key(key))
            .or_insert_with(|| ConversationState::initial(key.clone(), now));
        state.apply(patch, now);
        Ok(state.clone())
    }
}

#[derive(Default)]
pub struct InMemoryTimelineRepository {
    events: RwLock<Vec<TimelineEvent>>,
}

#[async_trait::async_trait]
impl TimelineRepository for InMemoryTimelineRepository {
    async fn record(&self, event: TimelineEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn list_for_entity(
        &self,
        tenant_id: &TenantId,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<TimelineEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut matching: Vec<TimelineEvent> = events
            .iter()
            .filter(|event| {
                &event.tenant_id == tenant_id
                    && event.entity_type == entity_type
                    && event.entity_id == entity_id
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        Ok(matching)
    }

    async fn list_by_correlation_id(
        &self,
        tenant_id: Option<&TenantId>,
        correlation_id: &str,
        limit: u32,
    ) -> Result<Vec<TimelineEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut matching: Vec<TimelineEvent> = events
            .iter()
            .filter(|event| event.correlation_id.as_deref() == Some(correlation_id))
            .filter(|event| tenant_id.map(|tenant| &event.tenant_id == tenant).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryTenantRepository {
    tenants: RwLock<HashMap<String, Tenant>>,
}

#[async_trait::async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(&id.0).cloned())
    }

    async fn find_by_channel_number(
        &self,
        channel_number: &str,
    ) -> Result<Option<Tenant>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.values().find(|tenant| tenant.channel_number == channel_number).cloned())
    }

    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant.id.0.clone(), tenant);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryInboundEventRepository {
    seen: RwLock<HashSet<String>>,
}

#[async_trait::async_trait]
impl InboundEventRepository for InMemoryInboundEventRepository {
    async fn record_if_new(
        &self,
        provider_event_id: &str,
        _tenant_id: &TenantId,
        _payload_json: &str,
        _received_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut seen = self.seen.write().await;
        Ok(seen.insert(provider_event_id.to_string()))
    }
}
