use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use courier_core::clock::Clock;
use courier_core::dedupe::DedupeGuard;
use courier_core::domain::conversation::{
    ConversationKey, ConversationPatch, ConversationState, PhaseTag,
};
use courier_core::domain::outbox::{EntityRef, MessageOrigin, NewOutboxMessage, OutboxItemId};
use courier_core::domain::tenant::Tenant;
use courier_core::domain::timeline::{StatusGroup, TimelineEvent};
use courier_core::errors::ApplicationError;
use courier_db::repositories::{
    ConversationRepository, InboundEventRepository, OutboxRepository, RepositoryError,
    TimelineRepository,
};

use crate::enqueue::enqueue_message;

const TIMELINE_ACTOR: &str = "inbound_flow";

/// One inbound message as delivered by the channel provider's webhook,
/// already resolved to a tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Provider-assigned event id, unique per delivery. Replays carry the
    /// same id.
    pub provider_event_id: String,
    pub channel_instance: String,
    pub remote_party: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// What the automation decided to do with an inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyDecision {
    pub payload_json: String,
    /// New conversation phase, when the automation advances it.
    pub next_phase: Option<PhaseTag>,
}

/// Automation hook: given the message and the conversation's current state,
/// decide whether and what to reply. `None` means stay silent.
#[async_trait]
pub trait ReplyProducer: Send + Sync {
    async fn produce(
        &self,
        message: &InboundMessage,
        state: &ConversationState,
    ) -> Result<Option<ReplyDecision>, ApplicationError>;
}

/// Producer that never replies. Inbound messages still update the durable
/// ledger and conversation state.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReplyProducer;

#[async_trait]
impl ReplyProducer for NoReplyProducer {
    async fn produce(
        &self,
        _message: &InboundMessage,
        _state: &ConversationState,
    ) -> Result<Option<ReplyDecision>, ApplicationError> {
        Ok(None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The provider replayed an event we already processed.
    Duplicate,
    NoReply,
    ReplyQueued(OutboxItemId),
}

/// Turns webhook deliveries into conversation updates and queued replies.
///
/// Replay defense is layered: the in-process dedupe guard short-circuits
/// hot replays without a database round trip, and the durable inbound event
/// ledger catches everything else, including replays after a restart.
pub struct InboundFlowHandler {
    outbox: Arc<dyn OutboxRepository>,
    conversations: Arc<dyn ConversationRepository>,
    timeline: Arc<dyn TimelineRepository>,
    inbound_events: Arc<dyn InboundEventRepository>,
    producer: Arc<dyn ReplyProducer>,
    dedupe: Arc<DedupeGuard>,
    dedupe_ttl: Duration,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl InboundFlowHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        conversations: Arc<dyn ConversationRepository>,
        timeline: Arc<dyn TimelineRepository>,
        inbound_events: Arc<dyn InboundEventRepository>,
        producer: Arc<dyn ReplyProducer>,
        dedupe: Arc<DedupeGuard>,
        dedupe_ttl: Duration,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
    ) -> Self {
        Self {
            outbox,
            conversations,
            timeline,
            inbound_events,
            producer,
            dedupe,
            dedupe_ttl,
            clock,
            max_attempts,
        }
    }

    pub async fn handle(
        &self,
        tenant: &Tenant,
        message: InboundMessage,
    ) -> Result<InboundOutcome, ApplicationError> {
        if self.dedupe.seen_recently(&message.provider_event_id, self.dedupe_ttl) {
            debug!(
                event_name = "inbound.replay_short_circuited",
                provider_event_id = %message.provider_event_id,
            );
            return Ok(InboundOutcome::Duplicate);
        }

        let payload = serde_json::json!({
            "text": message.text,
            "remote_party": message.remote_party,
        })
        .to_string();
        let fresh = self
            .inbound_events
            .record_if_new(&message.provider_event_id, &tenant.id, &payload, message.received_at)
            .await
            .map_err(persistence)?;
        if !fresh {
            debug!(
                event_name = "inbound.replay_rejected",
                provider_event_id = %message.provider_event_id,
            );
            return Ok(InboundOutcome::Duplicate);
        }

        let now = self.clock.now();
        let key = ConversationKey {
            tenant_id: tenant.id.clone(),
            channel_instance: message.channel_instance.clone(),
            remote_party: message.remote_party.clone(),
        };
        let state = match self.conversations.get(&key).await.map_err(persistence)? {
            Some(state) => state,
            None => ConversationState::initial(key.clone(), now),
        };

        // Handed-off conversations belong to a human operator. The inbound
        // message is still recorded, but automation stays quiet.
        if state.handoff_active {
            info!(
                event_name = "inbound.handoff_silent",
                tenant_id = %tenant.id,
                remote_party = %message.remote_party,
            );
            return Ok(InboundOutcome::NoReply);
        }

        let Some(decision) = self.producer.produce(&message, &state).await? else {
            return Ok(InboundOutcome::NoReply);
        };

        if let Some(next_phase) = decision.next_phase {
            self.conversations
                .update(
                    &key,
                    ConversationPatch { phase: Some(next_phase), handoff_active: None },
                    now,
                )
                .await
                .map_err(persistence)?;
        }

        let reply = NewOutboxMessage {
            tenant_id: tenant.id.clone(),
            channel_instance: message.channel_instance.clone(),
            remote_party: message.remote_party.clone(),
            payload_json: decision.payload_json,
            origin: MessageOrigin::Automation,
            entity: Some(EntityRef {
                entity_type: "conversation".to_string(),
                entity_id: message.remote_party.clone(),
            }),
            correlation_id: message.provider_event_id.clone(),
        };
        let item_id = enqueue_message(&self.outbox, reply, self.max_attempts, now).await?;

        let event = TimelineEvent::new(
            tenant.id.clone(),
            "conversation",
            message.remote_party.clone(),
            "reply_queued",
            StatusGroup::Progress,
            TIMELINE_ACTOR,
            now,
        )
        .with_correlation_id(message.provider_event_id.clone());
        self.timeline.record(event).await.map_err(persistence)?;

        info!(
            event_name = "inbound.reply_queued",
            tenant_id = %tenant.id,
            item_id = %item_id,
            provider_event_id = %message.provider_event_id,
        );
        Ok(InboundOutcome::ReplyQueued(item_id))
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    use courier_core::clock::{Clock, ManualClock};
    use courier_core::dedupe::DedupeGuard;
    use courier_core::domain::conversation::{
        ConversationKey, ConversationPatch, ConversationState, PhaseTag,
    };
    use courier_core::domain::outbox::OutboxStatus;
    use courier_core::domain::tenant::{Tenant, TenantId};
    use courier_core::errors::ApplicationError;
    use courier_db::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryInboundEventRepository,
        InMemoryOutboxRepository, InMemoryTimelineRepository, OutboxRepository,
        TimelineRepository,
    };

    use super::{
        InboundFlowHandler, InboundMessage, InboundOutcome, NoReplyProducer, ReplyDecision,
        ReplyProducer,
    };

    struct EchoProducer;

    #[async_trait]
    impl ReplyProducer for EchoProducer {
        async fn produce(
            &self,
            message: &InboundMessage,
            _state: &ConversationState,
        ) -> Result<Option<ReplyDecision>, ApplicationError> {
            Ok(Some(ReplyDecision {
                payload_json: format!("{{\"text\":\"echo: {}\"}}", message.text),
                next_phase: Some(PhaseTag::new("collecting_order")),
            }))
        }
    }

    struct Harness {
        outbox: Arc<InMemoryOutboxRepository>,
        conversations: Arc<InMemoryConversationRepository>,
        timeline: Arc<InMemoryTimelineRepository>,
        clock: Arc<ManualClock>,
        handler: InboundFlowHandler,
    }

    fn harness(producer: Arc<dyn ReplyProducer>) -> Harness {
        let outbox = Arc::new(InMemoryOutboxRepository::default());
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let timeline = Arc::new(InMemoryTimelineRepository::default());
        let inbound_events = Arc::new(InMemoryInboundEventRepository::default());
        let clock =
            Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()));
        let dedupe = Arc::new(DedupeGuard::new(clock.clone(), 1024));

        let handler = InboundFlowHandler::new(
            outbox.clone(),
            conversations.clone(),
            timeline.clone(),
            inbound_events,
            producer,
            dedupe,
            Duration::seconds(300),
            clock.clone(),
            5,
        );

        Harness { outbox, conversations, timeline, clock, handler }
    }

    fn tenant() -> Tenant {
        Tenant {
            id: TenantId("acme".to_string()),
            name: "Acme Inc".to_string(),
            channel_number: "+15550001".to_string(),
            daily_limit: 100,
            api_token: "token-acme".to_string(),
            active: true,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn message(event_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            provider_event_id: event_id.to_string(),
            channel_instance: "channel-1".to_string(),
            remote_party: "+15550100".to_string(),
            text: text.to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn fresh_message_queues_a_reply_and_advances_the_phase() {
        let harness = harness(Arc::new(EchoProducer));

        let outcome = harness
            .handler
            .handle(&tenant(), message("evt-1", "hello"))
            .await
            .expect("handle");

        let InboundOutcome::ReplyQueued(item_id) = outcome else {
            panic!("expected a queued reply, got {outcome:?}");
        };
        let item = harness.outbox.find_by_id(&item_id).await.expect("find").expect("exists");
        assert_eq!(item.status, OutboxStatus::Queued);
        assert_eq!(item.correlation_id, "evt-1");
        assert!(item.payload_json.contains("echo: hello"));

        let key = ConversationKey {
            tenant_id: TenantId("acme".to_string()),
            channel_instance: "channel-1".to_string(),
            remote_party: "+15550100".to_string(),
        };
        let state = harness.conversations.get(&key).await.expect("get").expect("state");
        assert_eq!(state.phase.value, "collecting_order");

        let events = harness
            .timeline
            .list_for_entity(&TenantId("acme".to_string()), "conversation", "+15550100")
            .await
            .expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "reply_queued");
    }

    #[tokio::test]
    async fn replayed_event_id_is_rejected_without_a_second_reply() {
        let harness = harness(Arc::new(EchoProducer));

        let first = harness
            .handler
            .handle(&tenant(), message("evt-1", "hello"))
            .await
            .expect("first");
        assert!(matches!(first, InboundOutcome::ReplyQueued(_)));

        let replay = harness
            .handler
            .handle(&tenant(), message("evt-1", "hello"))
            .await
            .expect("replay");
        assert_eq!(replay, InboundOutcome::Duplicate);
        assert_eq!(
            harness.outbox.count_by_status(OutboxStatus::Queued).await.expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn replay_after_the_dedupe_window_hits_the_durable_ledger() {
        let harness = harness(Arc::new(EchoProducer));

        harness.handler.handle(&tenant(), message("evt-1", "hello")).await.expect("first");

        // Past the in-process window; only the durable ledger can catch it.
        harness.clock.advance(Duration::seconds(600));
        let replay = harness
            .handler
            .handle(&tenant(), message("evt-1", "hello"))
            .await
            .expect("replay");

        assert_eq!(replay, InboundOutcome::Duplicate);
        assert_eq!(
            harness.outbox.count_by_status(OutboxStatus::Queued).await.expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn handed_off_conversation_stays_silent() {
        let harness = harness(Arc::new(EchoProducer));
        let key = ConversationKey {
            tenant_id: TenantId("acme".to_string()),
            channel_instance: "channel-1".to_string(),
            remote_party: "+15550100".to_string(),
        };
        harness
            .conversations
            .update(
                &key,
                ConversationPatch { phase: None, handoff_active: Some(true) },
                harness.clock.now(),
            )
            .await
            .expect("mark handoff");

        let outcome = harness
            .handler
            .handle(&tenant(), message("evt-1", "hello"))
            .await
            .expect("handle");

        assert_eq!(outcome, InboundOutcome::NoReply);
        assert_eq!(
            harness.outbox.count_by_status(OutboxStatus::Queued).await.expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn silent_producer_records_the_event_but_queues_nothing() {
        let harness = harness(Arc::new(NoReplyProducer));

        let outcome = harness
            .handler
            .handle(&tenant(), message("evt-1", "hello"))
            .await
            .expect("handle");

        assert_eq!(outcome, InboundOutcome::NoReply);
        assert_eq!(
            harness.outbox.count_by_status(OutboxStatus::Queued).await.expect("count"),
            0
        );

        // The id was still recorded durably, so a replay is a duplicate.
        let replay = harness
            .handler
            .handle(&tenant(), message("evt-1", "again"))
            .await
            .expect("replay");
        assert_eq!(replay, InboundOutcome::Duplicate);
    }
}
