use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use courier_core::backoff::BackoffPolicy;
use courier_core::clock::Clock;
use courier_core::domain::conversation::ConversationKey;
use courier_core::domain::outbox::{
    MessageOrigin, OutboxItem, OutboxStatus, SKIP_HANDOFF_ACTIVE, SKIP_QUOTA_EXHAUSTED,
};
use courier_core::domain::tenant::{Tenant, TenantId};
use courier_core::domain::timeline::{StatusGroup, TimelineEvent};
use courier_core::errors::ApplicationError;
use courier_db::repositories::{
    ConversationRepository, OutboxRepository, QuotaRepository, RepositoryError, TenantRepository,
    TimelineRepository,
};
use courier_gateway::TransportClient;

use crate::report::RunReport;

/// Skip reason stored when the item's tenant is missing or deactivated.
const SKIP_TENANT_UNAVAILABLE: &str = "tenant_unavailable";

const TIMELINE_ACTOR: &str = "outbox_runner";

#[derive(Clone, Copy, Debug)]
pub struct RunnerSettings {
    /// Attempts ceiling stamped on items at enqueue time; the runner itself
    /// honors each item's own `max_attempts`.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Claims older than this are presumed orphaned by a crashed runner and
    /// are reset to `queued` at the start of a drain cycle.
    pub claim_timeout: Duration,
    pub default_batch_limit: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
            claim_timeout: Duration::seconds(90),
            default_batch_limit: 50,
        }
    }
}

enum ItemOutcome {
    /// Another runner claimed the item between selection and claim.
    Lost,
    Sent,
    Requeued,
    Failed,
    Skipped,
}

/// Drains queued outbox items through quota admission, handoff gating, and
/// the transport. Safe to run concurrently: the atomic claim in the outbox
/// store is the only mutual exclusion, and every claim ends in a terminal
/// status or a requeue within the same cycle.
pub struct OutboxRunner {
    outbox: Arc<dyn OutboxRepository>,
    quota: Arc<dyn QuotaRepository>,
    conversations: Arc<dyn ConversationRepository>,
    timeline: Arc<dyn TimelineRepository>,
    tenants: Arc<dyn TenantRepository>,
    transport: Arc<dyn TransportClient>,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
}

impl OutboxRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        quota: Arc<dyn QuotaRepository>,
        conversations: Arc<dyn ConversationRepository>,
        timeline: Arc<dyn TimelineRepository>,
        tenants: Arc<dyn TenantRepository>,
        transport: Arc<dyn TransportClient>,
        clock: Arc<dyn Clock>,
        settings: RunnerSettings,
    ) -> Self {
        Self { outbox, quota, conversations, timeline, tenants, transport, clock, settings }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// One drain cycle. Returns `Err` only when the cycle could not start;
    /// a storage error mid-cycle aborts the remainder and is reported via
    /// `ok = false` so already-finished items keep their counts.
    pub async fn drain(
        &self,
        tenant_filter: Option<&TenantId>,
        limit: Option<u32>,
        dry_run: bool,
    ) -> Result<RunReport, ApplicationError> {
        let now = self.clock.now();
        let limit = limit.unwrap_or(self.settings.default_batch_limit);

        if dry_run {
            return self.simulate(tenant_filter, limit, now).await;
        }

        let cutoff = now - self.settings.claim_timeout;
        let reclaimed = self.outbox.reclaim_stale(cutoff).await.map_err(persistence)?;
        if reclaimed > 0 {
            warn!(event_name = "outbox.claims_reclaimed", reclaimed, "reset stale claims");
        }

        let due = self.outbox.select_due(tenant_filter, limit, now).await.map_err(persistence)?;
        debug!(event_name = "outbox.drain_started", candidates = due.len(), limit);

        let mut report = RunReport::default();
        for item in due {
            match self.process_item(item, now).await {
                Ok(ItemOutcome::Lost) => {}
                Ok(ItemOutcome::Sent) => report.record_sent(),
                Ok(ItemOutcome::Requeued) => report.record_requeued(),
                Ok(ItemOutcome::Failed) => report.record_failed(),
                Ok(ItemOutcome::Skipped) => report.record_skipped(),
                Err(error) => {
                    warn!(
                        event_name = "outbox.drain_aborted",
                        error = %error,
                        "storage error mid-cycle, aborting remainder"
                    );
                    report.record_aborted();
                    return Ok(report);
                }
            }
        }

        info!(
            event_name = "outbox.drain_finished",
            processed = report.processed,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
        );
        Ok(report)
    }

    async fn process_item(
        &self,
        mut item: OutboxItem,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, RepositoryError> {
        if !self.outbox.claim(&item.id, now).await? {
            return Ok(ItemOutcome::Lost);
        }
        item.status = OutboxStatus::Sending;
        item.claimed_at = Some(now);

        let tenant = match self.tenants.find_by_id(&item.tenant_id).await? {
            Some(tenant) if tenant.active => tenant,
            _ => {
                warn!(
                    event_name = "outbox.tenant_unavailable",
                    item_id = %item.id,
                    tenant_id = %item.tenant_id,
                );
                return self.finish_skipped(item, SKIP_TENANT_UNAVAILABLE, now).await;
            }
        };

        let decision =
            self.quota.reserve(&item.tenant_id, 1, tenant.daily_limit, now).await?;
        if decision.allowed == 0 {
            debug!(
                event_name = "outbox.quota_exhausted",
                item_id = %item.id,
                tenant_id = %item.tenant_id,
                limit = decision.limit,
            );
            return self.finish_skipped(item, SKIP_QUOTA_EXHAUSTED, now).await;
        }

        if item.origin == MessageOrigin::Automation && self.handoff_active(&item).await? {
            debug!(
                event_name = "outbox.handoff_suppressed",
                item_id = %item.id,
                remote_party = %item.remote_party,
            );
            return self.finish_skipped(item, SKIP_HANDOFF_ACTIVE, now).await;
        }

        let send_result = self
            .transport
            .send(&tenant.credentials(), &item.remote_party, &item.payload_json, &item.id.0)
            .await;

        match send_result {
            Ok(receipt) => {
                debug!(
                    event_name = "outbox.message_sent",
                    item_id = %item.id,
                    provider_message_id = receipt.provider_message_id.as_deref().unwrap_or(""),
                );
                item.status = OutboxStatus::Sent;
                item.attempts += 1;
                item.last_attempt_at = Some(now);
                item.claimed_at = None;
                item.last_error = None;
                self.outbox.save(&item).await?;
                self.record_timeline(&item, "message_sent", StatusGroup::Success, now).await?;
                Ok(ItemOutcome::Sent)
            }
            Err(error) if error.is_transient() && item.attempts + 1 < item.max_attempts => {
                let delay = self.settings.backoff.delay_after(item.attempts);
                warn!(
                    event_name = "outbox.send_requeued",
                    item_id = %item.id,
                    attempts = item.attempts + 1,
                    retry_in_secs = delay.num_seconds(),
                    error = %error,
                );
                item.status = OutboxStatus::Queued;
                item.attempts += 1;
                item.last_attempt_at = Some(now);
                item.claimed_at = None;
                item.last_error = Some(error.to_string());
                item.scheduled_not_before = Some(now + delay);
                self.outbox.save(&item).await?;
                Ok(ItemOutcome::Requeued)
            }
            Err(error) => {
                warn!(
                    event_name = "outbox.send_failed",
                    item_id = %item.id,
                    attempts = item.attempts + 1,
                    error = %error,
                );
                item.status = OutboxStatus::Failed;
                item.attempts += 1;
                item.last_attempt_at = Some(now);
                item.claimed_at = None;
                item.last_error = Some(error.to_string());
                self.outbox.save(&item).await?;
                self.record_timeline(&item, "message_failed", StatusGroup::Failure, now).await?;
                Ok(ItemOutcome::Failed)
            }
        }
    }

    async fn handoff_active(&self, item: &OutboxItem) -> Result<bool, RepositoryError> {
        let key = ConversationKey {
            tenant_id: item.tenant_id.clone(),
            channel_instance: item.channel_instance.clone(),
            remote_party: item.remote_party.clone(),
        };
        Ok(self
            .conversations
            .get(&key)
            .await?
            .map(|state| state.handoff_active)
            .unwrap_or(false))
    }

    async fn finish_skipped(
        &self,
        mut item: OutboxItem,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, RepositoryError> {
        item.status = OutboxStatus::Skipped;
        item.claimed_at = None;
        item.last_error = Some(reason.to_string());
        self.outbox.save(&item).await?;
        self.record_timeline(&item, "message_skipped", StatusGroup::Failure, now).await?;
        Ok(ItemOutcome::Skipped)
    }

    async fn record_timeline(
        &self,
        item: &OutboxItem,
        status: &str,
        group: StatusGroup,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let Some(entity) = &item.entity else {
            return Ok(());
        };
        let event = TimelineEvent::new(
            item.tenant_id.clone(),
            entity.entity_type.clone(),
            entity.entity_id.clone(),
            status,
            group,
            TIMELINE_ACTOR,
            now,
        )
        .with_correlation_id(item.correlation_id.clone());
        self.timeline.record(event).await
    }

    /// Read-only preview of a drain cycle: no reclaim, no claims, no quota
    /// reservations, no transport. Quota is simulated from the current
    /// remaining budget, decremented locally per tenant.
    async fn simulate(
        &self,
        tenant_filter: Option<&TenantId>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<RunReport, ApplicationError> {
        let due =
            self.outbox.select_due(tenant_filter, limit, now).await.map_err(persistence)?;

        let mut tenants: HashMap<String, Option<Tenant>> = HashMap::new();
        let mut budgets: HashMap<String, u32> = HashMap::new();
        let mut report = RunReport::default();

        for item in due {
            let tenant = match tenants.get(&item.tenant_id.0) {
                Some(cached) => cached.clone(),
                None => {
                    let found = self
                        .tenants
                        .find_by_id(&item.tenant_id)
                        .await
                        .map_err(persistence)?
                        .filter(|tenant| tenant.active);
                    tenants.insert(item.tenant_id.0.clone(), found.clone());
                    found
                }
            };
            let Some(tenant) = tenant else {
                report.record_skipped();
                continue;
            };

            let remaining = match budgets.get(&item.tenant_id.0) {
                Some(remaining) => *remaining,
                None => {
                    self.quota
                        .get_remaining(&item.tenant_id, tenant.daily_limit, now)
                        .await
                        .map_err(persistence)?
                        .remaining
                }
            };
            if remaining == 0 {
                budgets.insert(item.tenant_id.0.clone(), 0);
                report.record_skipped();
                continue;
            }

            if item.origin == MessageOrigin::Automation
                && self.handoff_active(&item).await.map_err(persistence)?
            {
                // A real drain reserves quota before the handoff check, so
                // the suppressed send still consumes budget.
                budgets.insert(item.tenant_id.0.clone(), remaining - 1);
                report.record_skipped();
                continue;
            }

            budgets.insert(item.tenant_id.0.clone(), remaining - 1);
            report.record_sent();
        }

        info!(
            event_name = "outbox.dry_run_finished",
            processed = report.processed,
            would_send = report.sent,
            skipped = report.skipped,
        );
        Ok(report)
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
