use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A messaging tenant. Tenant CRUD lives outside this core; the pipeline only
/// reads tenants to resolve webhooks and look up sending credentials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// Destination number the channel provider routes inbound traffic to.
    pub channel_number: String,
    pub daily_limit: u32,
    pub api_token: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Credentials handed to the transport client for a single send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantCredentials {
    pub tenant_id: TenantId,
    pub channel_number: String,
    pub api_token: String,
}

impl Tenant {
    pub fn credentials(&self) -> TenantCredentials {
        TenantCredentials {
            tenant_id: self.id.clone(),
            channel_number: self.channel_number.clone(),
            api_token: self.api_token.clone(),
        }
    }
}
