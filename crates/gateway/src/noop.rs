use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use courier_core::domain::tenant::TenantCredentials;

use crate::{SendReceipt, TransportClient, TransportError};

/// Offline transport: accepts every message without network I/O. Used when
/// no gateway base URL is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTransport;

#[async_trait]
impl TransportClient for NoopTransport {
    async fn send(
        &self,
        _credentials: &TenantCredentials,
        _remote_party: &str,
        _payload_json: &str,
        idempotency_token: &str,
    ) -> Result<SendReceipt, TransportError> {
        Ok(SendReceipt { provider_message_id: Some(format!("noop-{idempotency_token}")) })
    }

    async fn probe(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendCall {
    pub tenant_id: String,
    pub remote_party: String,
    pub payload_json: String,
    pub idempotency_token: String,
}

/// Records every send, optionally failing with scripted outcomes. The
/// runner tests assert against the recorded calls.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    calls: Arc<Mutex<Vec<SendCall>>>,
    failures: Arc<Mutex<Vec<TransportError>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues errors returned by upcoming sends, oldest first. Once the
    /// queue drains, sends succeed again.
    pub fn fail_next_with(&self, errors: impl IntoIterator<Item = TransportError>) {
        let mut failures = match self.failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        };
        failures.extend(errors);
    }

    pub fn calls(&self) -> Vec<SendCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl TransportClient for RecordingTransport {
    async fn send(
        &self,
        credentials: &TenantCredentials,
        remote_party: &str,
        payload_json: &str,
        idempotency_token: &str,
    ) -> Result<SendReceipt, TransportError> {
        {
            let mut calls = match self.calls.lock() {
                Ok(calls) => calls,
                Err(poisoned) => poisoned.into_inner(),
            };
            calls.push(SendCall {
                tenant_id: credentials.tenant_id.0.clone(),
                remote_party: remote_party.to_string(),
                payload_json: payload_json.to_string(),
                idempotency_token: idempotency_token.to_string(),
            });
        }

        let scripted = {
            let mut failures = match self.failures.lock() {
                Ok(failures) => failures,
                Err(poisoned) => poisoned.into_inner(),
            };
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };

        match scripted {
            Some(error) => Err(error),
            None => Ok(SendReceipt { provider_message_id: Some("recorded".to_string()) }),
        }
    }

    async fn probe(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use courier_core::domain::tenant::{TenantCredentials, TenantId};

    use super::{RecordingTransport, TransportClient, TransportError};

    fn credentials() -> TenantCredentials {
        TenantCredentials {
            tenant_id: TenantId("acme".to_string()),
            channel_number: "+15550001".to_string(),
            api_token: "token".to_string(),
        }
    }

    #[tokio::test]
    async fn recording_transport_replays_scripted_failures_in_order() {
        let transport = RecordingTransport::new();
        transport.fail_next_with([TransportError::Transient("429".to_string())]);

        let first = transport.send(&credentials(), "+15550100", "{}", "msg-1").await;
        let second = transport.send(&credentials(), "+15550100", "{}", "msg-2").await;

        assert!(matches!(first, Err(TransportError::Transient(_))));
        assert!(second.is_ok());
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(transport.calls()[0].idempotency_token, "msg-1");
    }
}
