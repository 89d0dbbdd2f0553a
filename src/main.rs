//! RTK CRM Server
//!
//! Starts the REST API exposing the multi-tenant CRM:
//! - Storage: sled KV, one tree per entity, tenant-prefixed keys
//! - Auth: HMAC-signed admin tokens, optional static API key
//! - Vault: AES-256-GCM for integration credentials at rest
//! - Outbound: UISP CRM client built per request from tenant configs
//!
//! Usage:
//!   cargo run --bin seed_data    # optional: demo tenant + customers
//!   cargo run --bin rtk-crm      # start server
//!   # Then query via curl or crm-cli (see README for examples)

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rtk_crm::config::Settings;
use rtk_crm::rest::{create_router, AppState};
use rtk_crm::storage::Storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env first so both RUST_LOG and the settings below can come from it.
    dotenvy::dotenv().ok();

    // Console output plus a daily-rolling JSON log file under logs/.
    let file_appender = tracing_appender::rolling::daily("logs", "rtk-crm.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rtk_crm=info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let settings = Settings::from_env();
    let bind_addr: SocketAddr = settings.bind_addr.parse()?;

    println!("🚀 RTK CRM starting on {}", bind_addr);
    println!("📦 Storage: sled at {}", settings.data_dir);
    println!("🔐 Auth: HMAC tokens | API key gate: {}", if settings.api_key.is_some() { "on" } else { "open" });
    println!("📖 See README.md for curl and crm-cli examples");

    let storage = Storage::open(&settings.data_dir)?;
    let state = AppState::new(storage.clone(), settings)?;
    let app = create_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // sled buffers writes; flush so a clean shutdown loses nothing.
    storage.flush()?;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    println!("Shutting down...");
}
