//! crm-cli: command-line client for the RTK CRM API.
//!
//! Admin auth is a bearer token saved to `.crm_token` by `login`; the
//! optional `--api-key` (or API_KEY env) is sent as `x-api-key`, and
//! tenant-scoped commands take `--tenant` for the `x-tenant-id` header.

use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::fs;

const TOKEN_FILE: &str = ".crm_token";

#[derive(Parser)]
#[command(name = "crm-cli")]
#[command(about = "CLI for RTK CRM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    /// Static API key, if the server has one configured (falls back to the
    /// API_KEY env var)
    #[arg(short = 'k', long)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Show the admin session behind the saved token
    Me,
    Logout,
    /// Generate a fresh base64 MASTER_KEY for the credential vault
    Keygen,
    CreateTenant {
        #[arg(short, long)]
        name: String,
        #[arg(short = 'N', long)]
        network_name: String,
    },
    ListTenants,
    DeleteTenant {
        #[arg(short = 't', long)]
        tenant: String,
    },
    CreateCustomer {
        #[arg(short = 't', long)]
        tenant: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        plan: String,
    },
    ListCustomers {
        #[arg(short = 't', long)]
        tenant: String,
    },
    /// Change a customer's status (active|suspended)
    SetStatus {
        #[arg(short = 't', long)]
        tenant: String,
        #[arg(short, long)]
        customer: String,
        #[arg(short, long)]
        status: String,
        #[arg(short, long)]
        reason: Option<String>,
    },
    CreateAutomation {
        #[arg(short = 't', long)]
        tenant: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "customer.status_changed")]
        event: String,
        #[arg(short = 'w', long)]
        webhook: String,
    },
    ListAutomations {
        #[arg(short = 't', long)]
        tenant: String,
    },
    /// Save (insert or replace) a provider config, passed as raw JSON
    SaveIntegration {
        #[arg(short = 't', long)]
        tenant: String,
        #[arg(short, long)]
        provider: String,
        #[arg(short, long, default_value = "{}")]
        config: String,
    },
    ListIntegrations {
        #[arg(short = 't', long)]
        tenant: String,
    },
    TestIntegration {
        #[arg(short = 't', long)]
        tenant: String,
        #[arg(short, long)]
        id: String,
    },
    UispTest {
        #[arg(short = 't', long)]
        tenant: String,
    },
    UispSearch {
        #[arg(short = 't', long)]
        tenant: String,
        #[arg(short, long)]
        query: String,
    },
    UispServices {
        #[arg(short = 't', long)]
        tenant: String,
        #[arg(short, long)]
        customer: String,
    },
    Dashboard {
        #[arg(short = 't', long)]
        tenant: String,
    },
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

fn with_api_key(req: RequestBuilder, api_key: &Option<String>) -> RequestBuilder {
    match api_key {
        Some(key) => req.header("x-api-key", key),
        None => req,
    }
}

fn scoped(req: RequestBuilder, api_key: &Option<String>, tenant: &str) -> RequestBuilder {
    with_api_key(req, api_key).header("x-tenant-id", tenant)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let api_key = cli.api_key.clone().or_else(|| std::env::var("API_KEY").ok());

    match cli.command {
        Commands::Login { username, password } => {
            let res = client
                .post(format!("{}/auth/login", cli.url))
                .json(&json!({ "username": username, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                // Save token
                fs::write(TOKEN_FILE, body.token)?;
                println!("Logged in. Token saved to {}", TOKEN_FILE);
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Me => {
            let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
            let res = client
                .get(format!("{}/auth/me", cli.url))
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::Logout => {
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
        Commands::Keygen => {
            use ring::rand::{SecureRandom, SystemRandom};
            let mut key = [0u8; 32];
            SystemRandom::new()
                .fill(&mut key)
                .map_err(|_| "failed to gather entropy")?;
            use base64::{engine::general_purpose::STANDARD, Engine};
            println!("{}", STANDARD.encode(key));
        }
        Commands::CreateTenant { name, network_name } => {
            let req = client
                .post(format!("{}/tenants", cli.url))
                .json(&json!({ "name": name, "network_name": network_name }));
            let res = with_api_key(req, &api_key).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::ListTenants => {
            let req = client.get(format!("{}/tenants", cli.url));
            let res = with_api_key(req, &api_key).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::DeleteTenant { tenant } => {
            let req = client.delete(format!("{}/tenants/{}", cli.url, tenant));
            let res = with_api_key(req, &api_key).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::CreateCustomer {
            tenant,
            name,
            email,
            plan,
        } => {
            let req = client
                .post(format!("{}/customers", cli.url))
                .json(&json!({ "name": name, "email": email, "plan_name": plan }));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::ListCustomers { tenant } => {
            let req = client.get(format!("{}/customers", cli.url));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::SetStatus {
            tenant,
            customer,
            status,
            reason,
        } => {
            let req = client
                .post(format!("{}/customers/{}/status", cli.url, customer))
                .json(&json!({ "status": status, "reason": reason }));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::CreateAutomation {
            tenant,
            name,
            event,
            webhook,
        } => {
            let req = client.post(format!("{}/automations", cli.url)).json(&json!({
                "name": name,
                "event": event,
                "target_webhook": webhook
            }));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::ListAutomations { tenant } => {
            let req = client.get(format!("{}/automations", cli.url));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::SaveIntegration {
            tenant,
            provider,
            config,
        } => {
            // Parse up front so a typo fails here, not server-side.
            let config: serde_json::Value = serde_json::from_str(&config)?;
            let req = client
                .post(format!("{}/integrations", cli.url))
                .json(&json!({ "provider": provider, "config": config }));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::ListIntegrations { tenant } => {
            let req = client.get(format!("{}/integrations", cli.url));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::TestIntegration { tenant, id } => {
            let req = client.post(format!("{}/integrations/{}/test", cli.url, id));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::UispTest { tenant } => {
            let req = client.post(format!("{}/uisp/test", cli.url));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::UispSearch { tenant, query } => {
            let req = client
                .get(format!("{}/uisp/customers/search", cli.url))
                .query(&[("q", query)]);
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::UispServices { tenant, customer } => {
            let req = client.get(format!(
                "{}/uisp/customers/{}/services",
                cli.url, customer
            ));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::Dashboard { tenant } => {
            let req = client.get(format!("{}/dashboard", cli.url));
            let res = scoped(req, &api_key, &tenant).send().await?;
            println!("Response: {}", res.text().await?);
        }
    }

    Ok(())
}
