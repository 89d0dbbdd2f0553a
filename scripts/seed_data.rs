//! Seed script for RTK CRM
//!
//! Populates the storage layer directly with a demo tenant, three customers,
//! an automation and, when MASTER_KEY is set, an encrypted UISP integration.
//! Run: cargo run --bin seed_data
//! Safe to re-run; each run creates a fresh tenant.

use rtk_crm::config::Settings;
use rtk_crm::models::{CustomerStatus, Provider};
use rtk_crm::storage::Storage;
use rtk_crm::vault::{ConfigMap, Vault};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();
    let storage = Storage::open(&settings.data_dir)?;

    let tenant = storage.create_tenant("Demo ISP".to_string(), "demo-network".to_string())?;
    println!("✅ Tenant created: {} ({})", tenant.name, tenant.id);

    // Sample customers across plans and statuses, enough for the dashboard
    // counters to show something.
    let customers = [
        ("Cliente Uno", "uno@example.com", "100Mbps", CustomerStatus::Active),
        ("Cliente Dos", "dos@example.com", "50Mbps", CustomerStatus::Active),
        ("Cliente Tres", "tres@example.com", "300Mbps", CustomerStatus::Suspended),
    ];
    for (name, email, plan, status) in customers {
        storage.create_customer(
            &tenant.id,
            name.to_string(),
            email.to_string(),
            plan.to_string(),
            status,
        )?;
    }
    println!("✅ Seeded 3 customers (1 suspended)");

    storage.create_automation(
        &tenant.id,
        "Suspension Flow".to_string(),
        "customer.status_changed".to_string(),
        true,
        "https://n8n.example.com/webhook/suspend".to_string(),
    )?;
    println!("✅ Seeded 1 automation on customer.status_changed");

    match settings.master_key.as_deref() {
        Some(material) => {
            let vault = Vault::open(material)?;
            let mut config = ConfigMap::new();
            config.insert("base_url".into(), json!("https://uisp.example.com"));
            config.insert("app_key".into(), json!("demo-app-key"));
            config.insert("token".into(), json!("demo-token"));
            let blob = vault.encrypt(&config)?;
            storage.upsert_integration(&tenant.id, Provider::Uisp, blob)?;
            println!("✅ Seeded an encrypted UISP integration");
        }
        None => println!("⚠️  MASTER_KEY not set; skipping the UISP integration"),
    }

    // Writes sit in sled's buffer until flushed; this process exits now.
    storage.flush()?;
    println!("Done. Use x-tenant-id: {} against the API.", tenant.id);
    Ok(())
}
