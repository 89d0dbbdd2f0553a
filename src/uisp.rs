//! Outbound UISP client, built per request from a tenant's decrypted
//! integration config.
//!
//! UISP deployments expose the CRM API under different prefixes, so every
//! call walks a fixed candidate list in order and reports the last failure
//! if none answers. Response shapes also vary between versions (bare arrays
//! vs wrapped lists, numeric vs string statuses); everything is normalized
//! before it reaches a caller.

use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::vault::ConfigMap;

/// API path prefixes tried in order under the configured base URL.
pub const CANDIDATE_PATHS: &[&str] = &["/crm/api/v1.0", "/api/v1.0"];

const APP_KEY_HEADER: &str = "x-auth-app-key";
const TOKEN_HEADER: &str = "x-auth-token";

/// Connection probe outcome; also the wire shape of the test endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UispCustomer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UispService {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

pub struct UispClient {
    http: reqwest::Client,
    base_url: String,
    app_key: Option<String>,
    token: Option<String>,
}

impl UispClient {
    /// Build a client from a decrypted `uisp` config map. `base_url` is
    /// required; `app_key` and `token` become the UISP auth headers.
    pub fn from_config(http: reqwest::Client, config: &ConfigMap) -> Result<Self, ApiError> {
        let base_url = config
            .get("base_url")
            .and_then(Value::as_str)
            .map(|s| s.trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::BadRequest("uisp config is missing base_url".into()))?;
        Ok(UispClient {
            http,
            base_url,
            app_key: config_str(config, "app_key"),
            token: config_str(config, "token"),
        })
    }

    /// GET a resource under each candidate prefix until one answers 2xx.
    /// No retries or backoff per prefix; the last failure wins.
    async fn get_json(&self, resource: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        let mut last_error = String::from("no candidate paths answered");
        for prefix in CANDIDATE_PATHS {
            let url = format!("{}{}{}", self.base_url, prefix, resource);
            let mut req = self.http.get(&url).query(query);
            if let Some(app_key) = &self.app_key {
                req = req.header(APP_KEY_HEADER, app_key);
            }
            if let Some(token) = &self.token {
                req = req.header(TOKEN_HEADER, token);
            }
            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<Value>().await.map_err(|e| {
                        ApiError::Upstream(format!("invalid JSON from UISP: {}", e))
                    });
                }
                Ok(resp) => {
                    last_error = format!("GET {} returned {}", url, resp.status());
                }
                Err(e) => {
                    last_error = format!("GET {} failed: {}", url, e);
                }
            }
        }
        tracing::warn!(base_url = %self.base_url, error = %last_error, "uisp request failed");
        Err(ApiError::Upstream(last_error))
    }

    /// Probe connectivity. Never fails hard: upstream trouble is an
    /// `ok=false` result, not an error response.
    pub async fn test_connection(&self) -> TestResult {
        match self.get_json("/clients", &[("limit", "1")]).await {
            Ok(_) => TestResult {
                ok: true,
                detail: "connection ok".into(),
            },
            Err(e) => TestResult {
                ok: false,
                detail: e.to_string(),
            },
        }
    }

    pub async fn search_clients(&self, query: &str) -> Result<Vec<UispCustomer>, ApiError> {
        let payload = self
            .get_json("/clients", &[("query", query), ("limit", "20")])
            .await?;
        Ok(normalize_clients(&payload))
    }

    pub async fn client_services(&self, client_id: &str) -> Result<Vec<UispService>, ApiError> {
        let payload = self
            .get_json("/clients/services", &[("clientId", client_id)])
            .await?;
        Ok(normalize_services(&payload))
    }
}

fn config_str(config: &ConfigMap, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// Extract the row list from a payload that is either a bare array or an
/// object wrapping one.
fn list_items(payload: &Value) -> Vec<Value> {
    if let Some(items) = payload.as_array() {
        return items.clone();
    }
    for key in ["items", "data", "results", "clients", "services"] {
        if let Some(items) = payload.get(key).and_then(Value::as_array) {
            return items.clone();
        }
    }
    Vec::new()
}

/// String field that may arrive as a JSON number (ids do, in older UISP).
fn field_string(row: &Value, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub fn normalize_clients(payload: &Value) -> Vec<UispCustomer> {
    list_items(payload)
        .iter()
        .map(|row| UispCustomer {
            id: field_string(row, "id").unwrap_or_default(),
            name: client_name(row),
            email: client_email(row),
            status: client_status(row),
        })
        .collect()
}

fn client_name(row: &Value) -> String {
    if let Some(company) = field_string(row, "companyName") {
        return company;
    }
    let first = field_string(row, "firstName").unwrap_or_default();
    let last = field_string(row, "lastName").unwrap_or_default();
    let full = format!("{} {}", first, last).trim().to_string();
    if !full.is_empty() {
        return full;
    }
    field_string(row, "name")
        .or_else(|| field_string(row, "username"))
        .unwrap_or_default()
}

fn client_email(row: &Value) -> String {
    if let Some(email) = field_string(row, "email") {
        return email;
    }
    // Older UISP CRM keeps the contact address in the login username.
    field_string(row, "username")
        .filter(|u| u.contains('@'))
        .unwrap_or_default()
}

fn client_status(row: &Value) -> String {
    if let Some(status) = row.get("status").and_then(Value::as_str) {
        return status.to_lowercase();
    }
    if row.get("isArchived").and_then(Value::as_bool) == Some(true) {
        return "suspended".into();
    }
    "active".into()
}

pub fn normalize_services(payload: &Value) -> Vec<UispService> {
    list_items(payload)
        .iter()
        .map(|row| UispService {
            id: field_string(row, "id").unwrap_or_default(),
            name: field_string(row, "name")
                .or_else(|| field_string(row, "servicePlanName"))
                .unwrap_or_default(),
            status: service_status(row.get("status")),
            price: row.get("price").and_then(Value::as_f64),
        })
        .collect()
}

/// UISP reports service status both as strings and as numeric codes.
fn service_status(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.to_lowercase(),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => "prepared".into(),
            Some(1) => "active".into(),
            Some(2) => "ended".into(),
            Some(3) => "suspended".into(),
            Some(other) => format!("status-{}", other),
            None => "unknown".into(),
        },
        _ => "unknown".into(),
    }
}
