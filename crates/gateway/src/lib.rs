//! Channel provider transport.
//!
//! The pipeline never talks to the provider API directly; it goes through
//! the [`TransportClient`] trait so the runner can be exercised against the
//! recording and no-op implementations. The HTTP implementation targets a
//! WhatsApp-style cloud API: one POST per message, bearer auth per tenant,
//! and a client-supplied message id the provider uses to collapse duplicate
//! send attempts.

pub mod http;
pub mod noop;

use async_trait::async_trait;
use thiserror::Error;

use courier_core::domain::tenant::TenantCredentials;

pub use http::HttpTransport;
pub use noop::{NoopTransport, RecordingTransport, SendCall};

/// Transport failures, split by whether a retry can help.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transient transport failure: {0}")]
    Transient(String),
    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// 429 and server errors are worth retrying; other client errors mean
    /// the request itself is bad and will never succeed.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 || status >= 500 {
            Self::Transient(format!("provider returned {status}: {body}"))
        } else {
            Self::Permanent(format!("provider returned {status}: {body}"))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider-side message id, when the provider reports one.
    pub provider_message_id: Option<String>,
}

#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn send(
        &self,
        credentials: &TenantCredentials,
        remote_party: &str,
        payload_json: &str,
        idempotency_token: &str,
    ) -> Result<SendReceipt, TransportError>;

    /// Cheap reachability probe for the health surface.
    async fn probe(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::TransportError;

    #[test]
    fn rate_limiting_and_server_errors_are_transient() {
        assert!(TransportError::from_status(429, String::new()).is_transient());
        assert!(TransportError::from_status(500, String::new()).is_transient());
        assert!(TransportError::from_status(503, String::new()).is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!TransportError::from_status(400, String::new()).is_transient());
        assert!(!TransportError::from_status(404, String::new()).is_transient());
        assert!(!TransportError::from_status(401, String::new()).is_transient());
    }
}
