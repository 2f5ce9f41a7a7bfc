pub mod backoff;
pub mod clock;
pub mod config;
pub mod dedupe;
pub mod domain;
pub mod errors;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedupe::DedupeGuard;
pub use domain::conversation::{ConversationKey, ConversationPatch, ConversationState, PhaseTag};
pub use domain::outbox::{
    EntityRef, MessageOrigin, NewOutboxMessage, OutboxItem, OutboxItemId, OutboxStatus,
    SKIP_HANDOFF_ACTIVE, SKIP_QUOTA_EXHAUSTED,
};
pub use domain::quota::{DailyQuotaRecord, QuotaDay, QuotaDecision, QuotaSnapshot};
pub use domain::tenant::{Tenant, TenantCredentials, TenantId};
pub use domain::timeline::{StatusGroup, TimelineEvent, TimelineEventId};
pub use errors::{ApplicationError, DomainError, InterfaceError};

pub use chrono;
pub use uuid;
