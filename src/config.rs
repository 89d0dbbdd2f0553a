//! Process configuration, loaded from the environment (and `.env` via
//! dotenvy in the binaries).
//!
//! Every option has a development default so the server starts with zero
//! setup; each security-relevant fallback logs a warning at startup.

use std::env;

use tracing::warn;

/// Built-in token-signing secret. Development fallback only.
pub const DEFAULT_AUTH_SECRET: &str = "rtk-dev-secret-change-me";

const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
const DEFAULT_TOKEN_TTL_SECS: u64 = 12 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub data_dir: String,
    pub auth_secret: String,
    pub token_ttl_secs: u64,
    pub admin_username: String,
    /// Either a bcrypt hash (`$2...`) or a plain value compared in
    /// constant time.
    pub admin_password: String,
    /// Static API key for the `x-api-key` gate. `None` leaves the gate open.
    pub api_key: Option<String>,
    /// 32-byte master key (base64 or raw) for the credential vault.
    /// Checked at first use, not at startup.
    pub master_key: Option<String>,
    pub uisp_timeout_secs: u64,
}

impl Settings {
    /// Read settings from the environment, warning on insecure fallbacks.
    pub fn from_env() -> Self {
        let auth_secret = env::var("AUTH_SECRET").unwrap_or_else(|_| {
            warn!("AUTH_SECRET is not set; using the built-in development secret");
            DEFAULT_AUTH_SECRET.to_string()
        });
        let admin_password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| {
            warn!("ADMIN_PASSWORD is not set; using the default admin credentials");
            DEFAULT_ADMIN_PASSWORD.to_string()
        });
        let api_key = env::var("API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("API_KEY is not set; the API-key gate is open");
        }

        Settings {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "crm_data".to_string()),
            auth_secret,
            token_ttl_secs: env_u64("AUTH_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS),
            admin_username: env::var("ADMIN_USERNAME")
                .unwrap_or_else(|_| DEFAULT_ADMIN_USERNAME.to_string()),
            admin_password,
            api_key,
            master_key: env::var("MASTER_KEY").ok().filter(|k| !k.is_empty()),
            uisp_timeout_secs: env_u64("UISP_TIMEOUT_SECS", 5),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
