//! REST API layer using Axum (served on port 8000 by default).
//!
//! Endpoint groups and their gates:
//! - open: `/health`, `/auth/login`
//! - bearer token: `/auth/me`
//! - API key (no-op when unconfigured): tenant CRUD plus the tenant-scoped
//!   customer, automation, integration, UISP and dashboard routes, which
//!   additionally require the `x-tenant-id` header.
//!
//! Errors follow the `{"detail": ...}` JSON contract of [`ApiError`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{middleware, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{self, AuthSession, TenantScope};
use crate::config::Settings;
use crate::error::ApiError;
use crate::models::{Automation, Customer, CustomerStatus, Dashboard, Integration, Provider, Tenant};
use crate::storage::Storage;
use crate::token;
use crate::uisp::{TestResult, UispClient};
use crate::vault::{ConfigMap, Vault};

/// Event automations subscribe to when a customer changes status.
const STATUS_CHANGED_EVENT: &str = "customer.status_changed";

/// Shared app state for REST handlers (Arc-wrapped for concurrency).
pub struct AppState {
    pub storage: Storage,
    pub settings: Settings,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(storage: Storage, settings: Settings) -> Result<Arc<Self>, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.uisp_timeout_secs))
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Arc::new(AppState {
            storage,
            settings,
            http,
        }))
    }
}

/// Create the Axum router with every endpoint group wired to its gate.
pub fn create_router(state: Arc<AppState>) -> Router {
    let session_routes = Router::new()
        .route("/auth/me", get(me_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let admin_routes = Router::new()
        .route("/tenants", post(create_tenant_handler).get(list_tenants_handler))
        .route("/tenants/:tenant_id", delete(delete_tenant_handler))
        .route(
            "/customers",
            post(create_customer_handler).get(list_customers_handler),
        )
        .route("/customers/:customer_id/status", post(customer_status_handler))
        .route(
            "/automations",
            post(create_automation_handler).get(list_automations_handler),
        )
        .route(
            "/integrations",
            post(upsert_integration_handler).get(list_integrations_handler),
        )
        .route("/integrations/:integration_id/test", post(test_integration_handler))
        .route("/uisp/test", post(test_uisp_handler))
        .route("/uisp/customers/search", get(uisp_search_handler))
        .route(
            "/uisp/customers/:customer_id/services",
            get(uisp_services_handler),
        )
        .route("/dashboard", get(dashboard_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .merge(session_routes)
        .merge(admin_routes)
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// --- Auth ---

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: u64,
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let settings = &state.settings;
    // Both checks run before branching so a bad username costs the same as
    // a bad password.
    let user_ok = payload.username == settings.admin_username;
    let pass_ok = auth::verify_admin_password(&settings.admin_password, &payload.password);
    if !(user_ok && pass_ok) {
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }

    let claims = token::admin_claims(&payload.username, settings.token_ttl_secs);
    let expires_at = claims.get("exp").and_then(Value::as_u64).unwrap_or_default();
    let token = token::sign(settings.auth_secret.as_bytes(), &claims);
    tracing::info!(username = %payload.username, "admin login");
    Ok(Json(LoginResponse { token, expires_at }))
}

async fn me_handler(Extension(session): Extension<AuthSession>) -> Json<Value> {
    Json(json!({ "username": session.subject, "role": session.role }))
}

// --- Tenants ---

#[derive(Deserialize)]
pub struct TenantCreate {
    pub name: String,
    pub network_name: String,
}

async fn create_tenant_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TenantCreate>,
) -> Result<Json<Tenant>, ApiError> {
    require_min_len(&payload.name, "name")?;
    require_min_len(&payload.network_name, "network_name")?;
    let tenant = state
        .storage
        .create_tenant(payload.name, payload.network_name)?;
    tracing::info!(tenant_id = %tenant.id, name = %tenant.name, "tenant created");
    Ok(Json(tenant))
}

async fn list_tenants_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Tenant>>, ApiError> {
    Ok(Json(state.storage.list_tenants()?))
}

async fn delete_tenant_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.storage.delete_tenant(&tenant_id)? {
        return Err(ApiError::NotFound("tenant"));
    }
    tracing::info!(%tenant_id, "tenant deleted with all owned rows");
    Ok(Json(json!({ "deleted": true })))
}

// --- Customers ---

#[derive(Deserialize)]
pub struct CustomerCreate {
    pub name: String,
    pub email: String,
    pub plan_name: String,
    #[serde(default)]
    pub status: Option<CustomerStatus>,
}

async fn create_customer_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
    Json(payload): Json<CustomerCreate>,
) -> Result<Json<Customer>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    require_min_len(&payload.name, "name")?;
    let status = payload.status.unwrap_or(CustomerStatus::Active);
    let customer = state.storage.create_customer(
        &tenant_id,
        payload.name,
        payload.email,
        payload.plan_name,
        status,
    )?;
    Ok(Json(customer))
}

async fn list_customers_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
) -> Result<Json<Vec<Customer>>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    Ok(Json(state.storage.list_customers(&tenant_id)?))
}

#[derive(Deserialize)]
pub struct StatusChange {
    pub status: CustomerStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Handler: change a customer's status and report the side effects (UISP
/// sync plus every enabled automation subscribed to the event).
async fn customer_status_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
    Path(customer_id): Path<String>,
    Json(payload): Json<StatusChange>,
) -> Result<Json<Value>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    let mut customer = state
        .storage
        .get_customer(&tenant_id, &customer_id)?
        .ok_or(ApiError::NotFound("customer"))?;

    customer.status = payload.status;
    state.storage.update_customer(&customer)?;
    tracing::info!(
        %tenant_id,
        %customer_id,
        status = customer.status.as_str(),
        "customer status changed"
    );

    let uisp_report = json!({
        "provider": "uisp",
        "tenant_id": tenant_id,
        "customer_id": customer_id,
        "status": customer.status.as_str(),
        "reason": payload.reason,
        "synced": true,
    });

    let mut automation_runs = Vec::new();
    for automation in state.storage.list_automations(&tenant_id)? {
        if automation.enabled && automation.event == STATUS_CHANGED_EVENT {
            automation_runs.push(json!({
                "provider": "n8n",
                "automation_id": automation.id,
                "webhook": automation.target_webhook,
                "payload": {
                    "event": STATUS_CHANGED_EVENT,
                    "tenant_id": tenant_id,
                    "customer_id": customer_id,
                    "status": customer.status.as_str(),
                    "reason": payload.reason,
                },
                "queued": true,
            }));
        }
    }

    Ok(Json(json!({
        "customer": customer,
        "uisp": uisp_report,
        "automations": automation_runs,
    })))
}

// --- Automations ---

#[derive(Deserialize)]
pub struct AutomationCreate {
    pub name: String,
    pub event: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub target_webhook: String,
}

fn default_enabled() -> bool {
    true
}

async fn create_automation_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
    Json(payload): Json<AutomationCreate>,
) -> Result<Json<Automation>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    require_min_len(&payload.name, "name")?;
    if reqwest::Url::parse(&payload.target_webhook).is_err() {
        return Err(ApiError::BadRequest(
            "target_webhook must be a valid URL".into(),
        ));
    }
    let automation = state.storage.create_automation(
        &tenant_id,
        payload.name,
        payload.event,
        payload.enabled,
        payload.target_webhook,
    )?;
    Ok(Json(automation))
}

async fn list_automations_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
) -> Result<Json<Vec<Automation>>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    Ok(Json(state.storage.list_automations(&tenant_id)?))
}

// --- Integrations ---

#[derive(Deserialize)]
pub struct IntegrationUpsert {
    pub provider: Provider,
    pub config: ConfigMap,
}

/// Integration as exposed over the API: the key set is visible, the values
/// never are.
#[derive(Serialize)]
pub struct IntegrationOut {
    pub id: String,
    pub tenant_id: String,
    pub provider: Provider,
    pub config_keys: Vec<String>,
}

fn integration_out(integration: &Integration, config: &ConfigMap) -> IntegrationOut {
    IntegrationOut {
        id: integration.id.clone(),
        tenant_id: integration.tenant_id.clone(),
        provider: integration.provider,
        config_keys: config.keys().cloned().collect(),
    }
}

async fn upsert_integration_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
    Json(payload): Json<IntegrationUpsert>,
) -> Result<Json<IntegrationOut>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    let vault = open_vault(&state.settings)?;
    let blob = vault.encrypt(&payload.config)?;
    let integration = state
        .storage
        .upsert_integration(&tenant_id, payload.provider, blob)?;
    tracing::info!(
        %tenant_id,
        provider = payload.provider.as_str(),
        "integration config saved"
    );
    Ok(Json(integration_out(&integration, &payload.config)))
}

async fn list_integrations_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
) -> Result<Json<Vec<IntegrationOut>>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    let vault = open_vault(&state.settings)?;
    let mut out = Vec::new();
    for integration in state.storage.list_integrations(&tenant_id)? {
        // A blob that no longer decrypts is a server-side problem and must
        // surface, not vanish from the listing.
        let config = vault.decrypt(&integration.config_encrypted)?;
        out.push(integration_out(&integration, &config));
    }
    Ok(Json(out))
}

async fn test_integration_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
    Path(integration_id): Path<String>,
) -> Result<Json<TestResult>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    let integration = state
        .storage
        .find_integration(&tenant_id, &integration_id)?
        .ok_or(ApiError::NotFound("integration"))?;
    let vault = open_vault(&state.settings)?;
    let config = vault.decrypt(&integration.config_encrypted)?;
    Ok(Json(test_provider(&state, integration.provider, &config).await))
}

/// Probe a provider with its decrypted config. Upstream trouble comes back
/// as `ok=false`, never as an error response.
async fn test_provider(state: &AppState, provider: Provider, config: &ConfigMap) -> TestResult {
    match provider {
        Provider::Uisp => match UispClient::from_config(state.http.clone(), config) {
            Ok(client) => client.test_connection().await,
            Err(e) => TestResult {
                ok: false,
                detail: e.to_string(),
            },
        },
        Provider::Chatwoot => ping(state, config, "/api/v1/profile", "api_access_token").await,
        Provider::N8n => ping(state, config, "/api/v1/workflows", "X-N8N-API-KEY").await,
    }
}

/// Reachability probe for providers with a single authenticated status
/// endpoint and an `api_key` config field.
async fn ping(state: &AppState, config: &ConfigMap, path: &str, header: &str) -> TestResult {
    let Some(base_url) = config
        .get("base_url")
        .and_then(Value::as_str)
        .map(|s| s.trim_end_matches('/'))
        .filter(|s| !s.is_empty())
    else {
        return TestResult {
            ok: false,
            detail: "config is missing base_url".into(),
        };
    };
    let mut req = state.http.get(format!("{}{}", base_url, path));
    if let Some(api_key) = config.get("api_key").and_then(Value::as_str) {
        req = req.header(header, api_key);
    }
    match req.send().await {
        Ok(resp) if resp.status().is_success() => TestResult {
            ok: true,
            detail: "connection ok".into(),
        },
        Ok(resp) => TestResult {
            ok: false,
            detail: format!("GET {}{} returned {}", base_url, path, resp.status()),
        },
        Err(e) => TestResult {
            ok: false,
            detail: format!("request failed: {}", e),
        },
    }
}

// --- UISP passthrough ---

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
}

async fn test_uisp_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
) -> Result<Json<TestResult>, ApiError> {
    let client = uisp_client(&state, &tenant_id)?;
    Ok(Json(client.test_connection().await))
}

async fn uisp_search_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let client = uisp_client(&state, &tenant_id)?;
    let results = client.search_clients(&params.q).await?;
    Ok(Json(json!({ "results": results })))
}

async fn uisp_services_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
    Path(customer_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = uisp_client(&state, &tenant_id)?;
    let services = client.client_services(&customer_id).await?;
    Ok(Json(json!({ "services": services })))
}

/// Load and decrypt the tenant's UISP config and build a client from it.
fn uisp_client(state: &AppState, tenant_id: &str) -> Result<UispClient, ApiError> {
    require_tenant(state, tenant_id)?;
    let integration = state
        .storage
        .get_integration(tenant_id, Provider::Uisp)?
        .ok_or(ApiError::NotFound("integration"))?;
    let vault = open_vault(&state.settings)?;
    let config = vault.decrypt(&integration.config_encrypted)?;
    UispClient::from_config(state.http.clone(), &config)
}

// --- Dashboard ---

async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    TenantScope(tenant_id): TenantScope,
) -> Result<Json<Dashboard>, ApiError> {
    require_tenant(&state, &tenant_id)?;
    let customers = state.storage.list_customers(&tenant_id)?;
    let active = customers
        .iter()
        .filter(|c| c.status == CustomerStatus::Active)
        .count();
    let suspended = customers
        .iter()
        .filter(|c| c.status == CustomerStatus::Suspended)
        .count();
    let integrations = state
        .storage
        .list_integrations(&tenant_id)?
        .iter()
        .map(|i| i.provider)
        .collect();
    let automations_enabled = state
        .storage
        .list_automations(&tenant_id)?
        .iter()
        .filter(|a| a.enabled)
        .count();

    Ok(Json(Dashboard {
        total_customers: customers.len(),
        active_customers: active,
        suspended_customers: suspended,
        integrations,
        automations_enabled,
    }))
}

// --- Shared handler helpers ---

fn require_tenant(state: &AppState, tenant_id: &str) -> Result<(), ApiError> {
    if !state.storage.tenant_exists(tenant_id)? {
        return Err(ApiError::NotFound("tenant"));
    }
    Ok(())
}

fn require_min_len(value: &str, field: &'static str) -> Result<(), ApiError> {
    if value.trim().chars().count() < 2 {
        return Err(ApiError::BadRequest(format!(
            "{} must be at least 2 characters",
            field
        )));
    }
    Ok(())
}

/// Integration features need the master key; its absence is a configuration
/// error at first use, never at startup.
fn open_vault(settings: &Settings) -> Result<Vault, ApiError> {
    let material = settings.master_key.as_deref().ok_or_else(|| {
        ApiError::Config("MASTER_KEY is not set; integration features are unavailable".into())
    })?;
    Ok(Vault::open(material)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::fs;
    use std::path::PathBuf;
    use tower::ServiceExt; // For .oneshot() testing

    fn test_settings() -> Settings {
        Settings {
            bind_addr: "127.0.0.1:0".into(),
            data_dir: String::new(),
            auth_secret: "rest-test-secret".into(),
            token_ttl_secs: 3600,
            admin_username: "admin".into(),
            admin_password: "admin123".into(),
            api_key: None,
            master_key: Some(STANDARD.encode([42u8; 32])),
            uisp_timeout_secs: 1,
        }
    }

    fn test_app(tag: &str, settings: Settings) -> (Router, PathBuf) {
        let dir = std::env::temp_dir().join(format!("rtk_crm_rest_test_{}", tag));
        let _ = fs::remove_dir_all(&dir);
        let storage = Storage::open(dir.to_str().unwrap()).expect("test storage");
        let state = AppState::new(storage, settings).expect("test state");
        (create_router(state), dir)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.expect("request");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    fn json_req(method: &str, uri: &str, tenant: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(tenant_id) = tenant {
            builder = builder.header(auth::TENANT_HEADER, tenant_id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_req(uri: &str, tenant: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(tenant_id) = tenant {
            builder = builder.header(auth::TENANT_HEADER, tenant_id);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn create_tenant(app: &Router, name: &str) -> String {
        let (status, body) = send(
            app,
            json_req(
                "POST",
                "/tenants",
                None,
                json!({ "name": name, "network_name": "net" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_customer(app: &Router, tenant: &str, name: &str) -> String {
        let (status, body) = send(
            app,
            json_req(
                "POST",
                "/customers",
                Some(tenant),
                json!({
                    "name": name,
                    "email": "c@example.com",
                    "plan_name": "100Mbps"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_open() {
        let (app, dir) = test_app("health", test_settings());
        let (status, body) = send(&app, get_req("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn login_and_me_round_trip() {
        let (app, dir) = test_app("login", test_settings());

        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/auth/login",
                None,
                json!({ "username": "admin", "password": "admin123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();
        assert!(body["expires_at"].as_u64().unwrap() > 0);

        let req = Request::builder()
            .method("GET")
            .uri("/auth/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "admin");
        assert_eq!(body["role"], "admin");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let (app, dir) = test_app("badlogin", test_settings());
        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/auth/login",
                None,
                json!({ "username": "admin", "password": "nope" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "invalid credentials");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn me_requires_a_valid_token() {
        let (app, dir) = test_app("me", test_settings());

        let (status, _) = send(&app, get_req("/auth/me", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("GET")
            .uri("/auth/me")
            .header(header::AUTHORIZATION, "Bearer not.a-real-token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["detail"].is_string());
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn api_key_gate_checks_when_configured() {
        let settings = Settings {
            api_key: Some("sekret".into()),
            ..test_settings()
        };
        let (app, dir) = test_app("apikey", settings);

        let (status, _) = send(&app, get_req("/tenants", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("GET")
            .uri("/tenants")
            .header(auth::API_KEY_HEADER, "wrong")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("GET")
            .uri("/tenants")
            .header(auth::API_KEY_HEADER, "sekret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);

        // Login stays reachable without the key.
        let (status, _) = send(
            &app,
            json_req(
                "POST",
                "/auth/login",
                None,
                json!({ "username": "admin", "password": "admin123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn api_key_gate_is_open_when_unset() {
        let (app, dir) = test_app("openkey", test_settings());
        let (status, _) = send(&app, get_req("/tenants", None)).await;
        assert_eq!(status, StatusCode::OK);
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn tenant_create_validates_name_length() {
        let (app, dir) = test_app("validate", test_settings());
        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/tenants",
                None,
                json!({ "name": "X", "network_name": "net" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("name"));
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn scoped_routes_require_the_tenant_header() {
        let (app, dir) = test_app("noheader", test_settings());
        let (status, body) = send(&app, get_req("/customers", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .contains(auth::TENANT_HEADER));
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn unknown_tenant_scope_is_not_found() {
        let (app, dir) = test_app("ghost", test_settings());
        let (status, body) = send(&app, get_req("/customers", Some("no-such-tenant"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "tenant not found");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn customers_are_isolated_per_tenant() {
        let (app, dir) = test_app("isolation", test_settings());
        let tenant_a = create_tenant(&app, "ISP Uno").await;
        let tenant_b = create_tenant(&app, "ISP Dos").await;
        let customer = create_customer(&app, &tenant_a, "Cliente Demo").await;

        let (status, body) = send(&app, get_req("/customers", Some(&tenant_a))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&app, get_req("/customers", Some(&tenant_b))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());

        // Another tenant's customer id behaves exactly like a missing one.
        let (status, body) = send(
            &app,
            json_req(
                "POST",
                &format!("/customers/{}/status", customer),
                Some(&tenant_b),
                json!({ "status": "suspended" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "customer not found");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn suspend_flow_reports_side_effects() {
        let (app, dir) = test_app("suspend", test_settings());
        let tenant = create_tenant(&app, "ISP Uno").await;
        let customer = create_customer(&app, &tenant, "Cliente Demo").await;

        let (status, _) = send(
            &app,
            json_req(
                "POST",
                "/automations",
                Some(&tenant),
                json!({
                    "name": "Suspension Flow",
                    "event": "customer.status_changed",
                    "target_webhook": "https://n8n.example.com/webhook/suspend"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        // A disabled automation must not fire.
        let (status, _) = send(
            &app,
            json_req(
                "POST",
                "/automations",
                Some(&tenant),
                json!({
                    "name": "Dormant Flow",
                    "event": "customer.status_changed",
                    "enabled": false,
                    "target_webhook": "https://n8n.example.com/webhook/dormant"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            json_req(
                "POST",
                &format!("/customers/{}/status", customer),
                Some(&tenant),
                json!({ "status": "suspended", "reason": "unpaid balance" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["customer"]["status"], "suspended");
        assert_eq!(body["uisp"]["provider"], "uisp");
        assert_eq!(body["uisp"]["synced"], true);
        assert_eq!(body["uisp"]["reason"], "unpaid balance");
        let runs = body["automations"].as_array().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["provider"], "n8n");
        assert_eq!(runs[0]["queued"], true);
        assert_eq!(runs[0]["payload"]["status"], "suspended");

        // Reactivation persists too.
        let (status, body) = send(
            &app,
            json_req(
                "POST",
                &format!("/customers/{}/status", customer),
                Some(&tenant),
                json!({ "status": "active" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["customer"]["status"], "active");

        let (_, body) = send(&app, get_req("/customers", Some(&tenant))).await;
        assert_eq!(body[0]["status"], "active");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn automation_webhook_must_be_a_url() {
        let (app, dir) = test_app("badhook", test_settings());
        let tenant = create_tenant(&app, "ISP Uno").await;
        let (status, _) = send(
            &app,
            json_req(
                "POST",
                "/automations",
                Some(&tenant),
                json!({
                    "name": "Broken",
                    "event": "customer.status_changed",
                    "target_webhook": "not a url"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn integration_upsert_exposes_keys_never_values() {
        let (app, dir) = test_app("intkeys", test_settings());
        let tenant = create_tenant(&app, "ISP Uno").await;

        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/integrations",
                Some(&tenant),
                json!({
                    "provider": "uisp",
                    "config": { "base_url": "https://uisp.example.com", "api_key": "hunter2" }
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["provider"], "uisp");
        assert_eq!(body["config_keys"], json!(["api_key", "base_url"]));
        assert!(body.get("config").is_none());
        assert!(body.get("config_encrypted").is_none());
        let first_id = body["id"].as_str().unwrap().to_string();

        // Upsert replaces the row, keeping its id.
        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/integrations",
                Some(&tenant),
                json!({
                    "provider": "uisp",
                    "config": { "base_url": "https://uisp.example.com", "app_key": "a", "token": "t" }
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], first_id.as_str());
        assert_eq!(body["config_keys"], json!(["app_key", "base_url", "token"]));

        let (status, body) = send(&app, get_req("/integrations", Some(&tenant))).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["config_keys"], json!(["app_key", "base_url", "token"]));
        assert!(rows[0].get("config_encrypted").is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn integrations_need_the_master_key() {
        let settings = Settings {
            master_key: None,
            ..test_settings()
        };
        let (app, dir) = test_app("nokey", settings);
        let tenant = create_tenant(&app, "ISP Uno").await;

        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/integrations",
                Some(&tenant),
                json!({ "provider": "n8n", "config": { "base_url": "https://n8n.example.com" } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("MASTER_KEY"));

        // Rows without configs still work: the key is only needed at use.
        let (status, _) = send(&app, get_req("/customers", Some(&tenant))).await;
        assert_eq!(status, StatusCode::OK);
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn testing_an_unknown_integration_is_not_found() {
        let (app, dir) = test_app("inttest", test_settings());
        let tenant = create_tenant(&app, "ISP Uno").await;
        let (status, body) = send(
            &app,
            json_req(
                "POST",
                "/integrations/no-such-row/test",
                Some(&tenant),
                json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "integration not found");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn uisp_routes_require_a_stored_integration() {
        let (app, dir) = test_app("uispmissing", test_settings());
        let tenant = create_tenant(&app, "ISP Uno").await;
        let (status, body) = send(&app, get_req("/uisp/customers/search?q=ana", Some(&tenant))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "integration not found");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn uisp_probe_reports_unreachable_upstream_as_ok_false() {
        let (app, dir) = test_app("uispprobe", test_settings());
        let tenant = create_tenant(&app, "ISP Uno").await;
        // Nothing listens on the discard port, so the walk fails fast.
        let (status, _) = send(
            &app,
            json_req(
                "POST",
                "/integrations",
                Some(&tenant),
                json!({
                    "provider": "uisp",
                    "config": { "base_url": "http://127.0.0.1:9", "app_key": "k", "token": "t" }
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            json_req("POST", "/uisp/test", Some(&tenant), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], false);
        assert!(body["detail"].as_str().unwrap().len() > 0);

        // Data endpoints surface the same failure as a gateway error.
        let (status, body) = send(&app, get_req("/uisp/customers/search?q=ana", Some(&tenant))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["detail"].is_string());
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn dashboard_counts_reflect_tenant_state() {
        let (app, dir) = test_app("dashboard", test_settings());
        let tenant = create_tenant(&app, "ISP Uno").await;
        create_customer(&app, &tenant, "Cliente Uno").await;
        let suspended = create_customer(&app, &tenant, "Cliente Dos").await;

        let (status, _) = send(
            &app,
            json_req(
                "POST",
                &format!("/customers/{}/status", suspended),
                Some(&tenant),
                json!({ "status": "suspended" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        send(
            &app,
            json_req(
                "POST",
                "/integrations",
                Some(&tenant),
                json!({ "provider": "uisp", "config": { "base_url": "https://uisp.example.com" } }),
            ),
        )
        .await;
        send(
            &app,
            json_req(
                "POST",
                "/automations",
                Some(&tenant),
                json!({
                    "name": "Suspension Flow",
                    "event": "customer.status_changed",
                    "target_webhook": "https://n8n.example.com/webhook/suspend"
                }),
            ),
        )
        .await;

        let (status, body) = send(&app, get_req("/dashboard", Some(&tenant))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_customers"], 2);
        assert_eq!(body["active_customers"], 1);
        assert_eq!(body["suspended_customers"], 1);
        assert_eq!(body["integrations"], json!(["uisp"]));
        assert_eq!(body["automations_enabled"], 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn tenant_delete_removes_owned_rows() {
        let (app, dir) = test_app("cascade", test_settings());
        let tenant = create_tenant(&app, "ISP Uno").await;
        create_customer(&app, &tenant, "Cliente Demo").await;

        let (status, body) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/tenants/{}", tenant))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);

        // The scope itself is gone now.
        let (status, _) = send(&app, get_req("/customers", Some(&tenant))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            Request::builder()
                .method("DELETE")
                .uri(format!("/tenants/{}", tenant))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "tenant not found");
        let _ = fs::remove_dir_all(dir);
    }
}
