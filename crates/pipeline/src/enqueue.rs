use std::sync::Arc;

use chrono::{DateTime, Utc};

use courier_core::domain::outbox::{NewOutboxMessage, OutboxItemId};
use courier_core::errors::ApplicationError;
use courier_db::repositories::OutboxRepository;

/// Validates and persists an outbound message. Rejection happens here,
/// synchronously; invalid messages never enter the store.
pub async fn enqueue_message(
    outbox: &Arc<dyn OutboxRepository>,
    message: NewOutboxMessage,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<OutboxItemId, ApplicationError> {
    message.validate()?;

    let item = message.into_item(max_attempts, now);
    let id = item.id.clone();
    outbox
        .insert(item)
        .await
        .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
    Ok(id)
}
