use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Active,
    Suspended,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Suspended => "suspended",
        }
    }
}

/// Third-party systems a tenant can hold credentials for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Uisp,
    Chatwoot,
    N8n,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Uisp => "uisp",
            Provider::Chatwoot => "chatwoot",
            Provider::N8n => "n8n",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub network_name: String, // UISP network/site this tenant maps to
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub email: String,
    pub plan_name: String,
    pub status: CustomerStatus,
    pub created_at: DateTime<Utc>,
}

/// Stored integration row. `config_encrypted` is the vault blob; the
/// plaintext config never touches disk.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Integration {
    pub id: String,
    pub tenant_id: String,
    pub provider: Provider,
    pub config_encrypted: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Automation {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub event: String,
    pub enabled: bool,
    pub target_webhook: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Dashboard {
    pub total_customers: usize,
    pub active_customers: usize,
    pub suspended_customers: usize,
    pub integrations: Vec<Provider>,
    pub automations_enabled: usize,
}
