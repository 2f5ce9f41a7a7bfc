use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use courier_core::domain::tenant::{Tenant, TenantId};
use courier_pipeline::inbound::{InboundMessage, InboundOutcome};

use crate::admin::ErrorBody;
use crate::bootstrap::AppState;

/// Provider webhook payload. Tenants resolve either by explicit id or by
/// the channel number the provider delivered the message to.
#[derive(Debug, Deserialize)]
pub struct InboundRequest {
    pub provider_event_id: String,
    pub tenant_id: Option<String>,
    pub channel_number: Option<String>,
    pub channel_instance: String,
    pub remote_party: String,
    pub text: String,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct InboundResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub async fn inbound(
    State(state): State<AppState>,
    Json(request): Json<InboundRequest>,
) -> Result<Json<InboundResponse>, ApiError> {
    validate(&request)?;

    let tenant = resolve_tenant(&state, &request).await?;
    let message = InboundMessage {
        provider_event_id: request.provider_event_id,
        channel_instance: request.channel_instance,
        remote_party: request.remote_party,
        text: request.text,
        received_at: request.received_at.unwrap_or_else(Utc::now),
    };

    let outcome = state.inbound.handle(&tenant, message).await.map_err(|error| {
        warn!(event_name = "webhook.inbound_failed", error = %error);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: error.to_string(),
                correlation_id: Uuid::new_v4().to_string(),
            }),
        )
    })?;

    let response = match outcome {
        InboundOutcome::Duplicate => InboundResponse { outcome: "duplicate", item_id: None },
        InboundOutcome::NoReply => InboundResponse { outcome: "no_reply", item_id: None },
        InboundOutcome::ReplyQueued(item_id) => {
            InboundResponse { outcome: "reply_queued", item_id: Some(item_id.0) }
        }
    };

    info!(
        event_name = "webhook.inbound_handled",
        tenant_id = %tenant.id,
        outcome = response.outcome,
    );
    Ok(Json(response))
}

fn validate(request: &InboundRequest) -> Result<(), ApiError> {
    let missing = [
        ("provider_event_id", request.provider_event_id.trim().is_empty()),
        ("channel_instance", request.channel_instance.trim().is_empty()),
        ("remote_party", request.remote_party.trim().is_empty()),
    ]
    .into_iter()
    .find_map(|(field, empty)| empty.then_some(field));

    if let Some(field) = missing {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: format!("{field} must not be empty"),
                correlation_id: Uuid::new_v4().to_string(),
            }),
        ));
    }
    Ok(())
}

async fn resolve_tenant(state: &AppState, request: &InboundRequest) -> Result<Tenant, ApiError> {
    let found = match (&request.tenant_id, &request.channel_number) {
        (Some(tenant_id), _) => state
            .tenants
            .find_by_id(&TenantId(tenant_id.clone()))
            .await
            .map_err(lookup_error)?,
        (None, Some(channel_number)) => {
            state.tenants.find_by_channel_number(channel_number).await.map_err(lookup_error)?
        }
        (None, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: "either tenant_id or channel_number is required".to_string(),
                    correlation_id: Uuid::new_v4().to_string(),
                }),
            ));
        }
    };

    match found {
        Some(tenant) if tenant.active => Ok(tenant),
        _ => {
            warn!(event_name = "webhook.tenant_unresolved", "inbound for unknown tenant");
            Err((
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: "no active tenant matches this delivery".to_string(),
                    correlation_id: Uuid::new_v4().to_string(),
                }),
            ))
        }
    }
}

fn lookup_error(error: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: error.to_string(), correlation_id: Uuid::new_v4().to_string() }),
    )
}
