use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use courier_core::domain::tenant::TenantId;
use courier_db::migrations::MANAGED_SCHEMA_OBJECTS;
use courier_pipeline::report::RunReport;

use crate::bootstrap::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// Either `dry_run` or `send`.
    pub mode: String,
    pub tenant: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub mode: String,
    pub report: RunReport,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub schema_ok: bool,
    pub counts: StatusCounts,
}

#[derive(Debug, Default, Serialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub sending: i64,
    pub sent: i64,
    pub failed: i64,
    pub skipped: i64,
}

pub async fn run_outbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    authorize(&state, &headers)?;

    let dry_run = match request.mode.as_str() {
        "dry_run" => true,
        "send" => false,
        other => {
            return Err(bad_request(format!(
                "mode must be `dry_run` or `send`, got `{other}`"
            )));
        }
    };

    let tenant_id = request.tenant.map(TenantId);
    let report = state
        .runner
        .drain(tenant_id.as_ref(), request.limit, dry_run)
        .await
        .map_err(internal_error)?;

    info!(
        event_name = "admin.outbox_run",
        mode = %request.mode,
        processed = report.processed,
        sent = report.sent,
        failed = report.failed,
        skipped = report.skipped,
    );
    Ok(Json(RunResponse { mode: request.mode, report }))
}

pub async fn outbox_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, ApiError> {
    authorize(&state, &headers)?;

    let mut counts = StatusCounts::default();
    let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM outbox_item GROUP BY status")
        .fetch_all(&state.db_pool)
        .await
        .map_err(internal_error)?;
    for row in rows {
        let status: String = row.get("status");
        let count: i64 = row.get("count");
        match status.as_str() {
            "queued" => counts.queued = count,
            "sending" => counts.sending = count,
            "sent" => counts.sent = count,
            "failed" => counts.failed = count,
            "skipped" => counts.skipped = count,
            _ => {}
        }
    }

    let placeholders = vec!["?"; MANAGED_SCHEMA_OBJECTS.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'index') AND name IN ({placeholders})"
    );
    let mut presence = sqlx::query_scalar::<_, i64>(&sql);
    for object in MANAGED_SCHEMA_OBJECTS {
        presence = presence.bind(*object);
    }
    let present = presence.fetch_one(&state.db_pool).await.map_err(internal_error)?;

    Ok(Json(StatusResponse {
        schema_ok: present == MANAGED_SCHEMA_OBJECTS.len() as i64,
        counts,
    }))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.admin_token else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: "admin endpoints are disabled: no admin token configured".to_string(),
                correlation_id: Uuid::new_v4().to_string(),
            }),
        ));
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if presented != Some(expected.as_str()) {
        warn!(event_name = "admin.unauthorized", "admin request with missing or wrong token");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: "missing or invalid admin token".to_string(),
                correlation_id: Uuid::new_v4().to_string(),
            }),
        ));
    }

    Ok(())
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody { error: message, correlation_id: Uuid::new_v4().to_string() }),
    )
}

fn internal_error(error: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: error.to_string(), correlation_id: Uuid::new_v4().to_string() }),
    )
}
