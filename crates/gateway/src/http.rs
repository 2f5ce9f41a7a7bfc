use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_core::domain::tenant::TenantCredentials;

use crate::{SendReceipt, TransportClient, TransportError};

/// reqwest-backed client for the provider's message API.
///
/// Outbound sends authenticate with the per-tenant token; the
/// service-level token only authenticates the readiness probe.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    service_token: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    payload: &'a serde_json::value::RawValue,
    client_message_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: Option<String>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        service_token: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|error| TransportError::Permanent(format!("client build failed: {error}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_token: service_token.into(),
        })
    }
}

#[async_trait]
impl TransportClient for HttpTransport {
    async fn send(
        &self,
        credentials: &TenantCredentials,
        remote_party: &str,
        payload_json: &str,
        idempotency_token: &str,
    ) -> Result<SendReceipt, TransportError> {
        let payload = serde_json::value::RawValue::from_string(payload_json.to_string())
            .map_err(|error| TransportError::Permanent(format!("malformed payload: {error}")))?;

        let url = format!("{}/{}/messages", self.base_url, credentials.channel_number);
        let request = SendRequest {
            to: remote_party,
            payload: &payload,
            client_message_id: idempotency_token,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credentials.api_token)
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status.as_u16(), body));
        }

        let parsed = response
            .json::<SendResponse>()
            .await
            .map_err(|error| TransportError::Transient(format!("unreadable response: {error}")))?;

        tracing::debug!(
            event_name = "gateway.send.accepted",
            tenant_id = %credentials.tenant_id,
            provider_message_id = parsed.message_id.as_deref().unwrap_or("unknown"),
            "provider accepted outbound message"
        );

        Ok(SendReceipt { provider_message_id: parsed.message_id })
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.client
            .get(&self.base_url)
            .bearer_auth(&self.service_token)
            .send()
            .await
            .map(|_| ())
            .map_err(classify_reqwest_error)
    }
}

// Timeouts and connection failures are retryable; anything structural in
// the request is not.
fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() || error.is_connect() {
        TransportError::Transient(error.to_string())
    } else if error.is_builder() || error.is_request() {
        TransportError::Permanent(error.to_string())
    } else {
        TransportError::Transient(error.to_string())
    }
}
