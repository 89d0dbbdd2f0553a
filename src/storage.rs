//! Persistence layer: sled trees for tenants, customers, integrations and
//! automations.
//!
//! Customer, integration and automation rows are keyed `{tenant_id}/{suffix}`,
//! so every tenant-scoped read is a prefix scan and a row is only reachable
//! through its owning tenant. Values are serde_json-encoded rows.

use chrono::Utc;
use serde::de::DeserializeOwned;
use sled::transaction::TransactionError;
use sled::{Db, Transactional, Tree};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Automation, Customer, CustomerStatus, Integration, Provider, Tenant};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage error: {0}")]
    Db(#[from] sled::Error),
    #[error("stored row is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("transaction failed: {0}")]
    Transaction(String),
}

#[derive(Clone)] // Clone for sharing across handlers (sled internals are cheap to clone)
pub struct Storage {
    db: Db,
    tenants: Tree,
    customers: Tree,
    integrations: Tree,
    automations: Tree,
}

impl Storage {
    /// Open or create the database at the given path.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Storage {
            tenants: db.open_tree("tenants")?,
            customers: db.open_tree("customers")?,
            integrations: db.open_tree("integrations")?,
            automations: db.open_tree("automations")?,
            db,
        })
    }

    /// Force buffered writes to disk. Called before process exit; sled only
    /// flushes on its own interval otherwise.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    // --- Tenants ---

    pub fn create_tenant(
        &self,
        name: String,
        network_name: String,
    ) -> Result<Tenant, StorageError> {
        let tenant = Tenant {
            id: Uuid::new_v4().to_string(),
            name,
            network_name,
            created_at: Utc::now(),
        };
        self.tenants
            .insert(tenant.id.as_bytes(), serde_json::to_vec(&tenant)?)?;
        Ok(tenant)
    }

    pub fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, StorageError> {
        decode_opt(self.tenants.get(id.as_bytes())?)
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        let mut tenants: Vec<Tenant> = decode_iter(self.tenants.iter())?;
        tenants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tenants)
    }

    pub fn tenant_exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.tenants.contains_key(id.as_bytes())?)
    }

    /// Delete a tenant and everything it owns in one multi-tree transaction,
    /// so a crash cannot leave orphaned child rows. Returns `false` when the
    /// tenant does not exist.
    pub fn delete_tenant(&self, id: &str) -> Result<bool, StorageError> {
        if !self.tenant_exists(id)? {
            return Ok(false);
        }
        // sled transactions cannot iterate; the keys to remove are collected
        // up front and applied as batches inside.
        let prefix = scope_prefix(id);
        let customers = remove_batch(&self.customers, &prefix)?;
        let integrations = remove_batch(&self.integrations, &prefix)?;
        let automations = remove_batch(&self.automations, &prefix)?;
        let tenant_key = id.as_bytes().to_vec();

        let result: Result<(), TransactionError<()>> = [
            &self.tenants,
            &self.customers,
            &self.integrations,
            &self.automations,
        ]
        .transaction(|trees| {
            trees[0].remove(tenant_key.as_slice())?;
            trees[1].apply_batch(&customers)?;
            trees[2].apply_batch(&integrations)?;
            trees[3].apply_batch(&automations)?;
            Ok(())
        });
        result.map_err(|e| match e {
            TransactionError::Abort(()) => StorageError::Transaction("aborted".into()),
            TransactionError::Storage(err) => StorageError::Db(err),
        })?;
        Ok(true)
    }

    // --- Customers ---

    pub fn create_customer(
        &self,
        tenant_id: &str,
        name: String,
        email: String,
        plan_name: String,
        status: CustomerStatus,
    ) -> Result<Customer, StorageError> {
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name,
            email,
            plan_name,
            status,
            created_at: Utc::now(),
        };
        self.update_customer(&customer)?;
        Ok(customer)
    }

    pub fn update_customer(&self, customer: &Customer) -> Result<(), StorageError> {
        self.customers.insert(
            scoped_key(&customer.tenant_id, &customer.id),
            serde_json::to_vec(customer)?,
        )?;
        Ok(())
    }

    pub fn get_customer(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<Customer>, StorageError> {
        decode_opt(self.customers.get(scoped_key(tenant_id, id))?)
    }

    pub fn list_customers(&self, tenant_id: &str) -> Result<Vec<Customer>, StorageError> {
        let mut rows: Vec<Customer> =
            decode_iter(self.customers.scan_prefix(scope_prefix(tenant_id)))?;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    // --- Integrations ---

    /// Insert or replace the integration for (tenant, provider). One row per
    /// provider per tenant; the row id survives upserts so stored references
    /// stay valid.
    pub fn upsert_integration(
        &self,
        tenant_id: &str,
        provider: Provider,
        config_encrypted: String,
    ) -> Result<Integration, StorageError> {
        let key = scoped_key(tenant_id, provider.as_str());
        let id = decode_opt::<Integration>(self.integrations.get(&key)?)?
            .map(|existing| existing.id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let integration = Integration {
            id,
            tenant_id: tenant_id.to_string(),
            provider,
            config_encrypted,
        };
        self.integrations
            .insert(key, serde_json::to_vec(&integration)?)?;
        Ok(integration)
    }

    pub fn get_integration(
        &self,
        tenant_id: &str,
        provider: Provider,
    ) -> Result<Option<Integration>, StorageError> {
        decode_opt(
            self.integrations
                .get(scoped_key(tenant_id, provider.as_str()))?,
        )
    }

    /// Look up an integration by row id within a tenant. Rows of other
    /// tenants are outside the scanned prefix, hence unreachable.
    pub fn find_integration(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<Integration>, StorageError> {
        for row in self.list_integrations(tenant_id)? {
            if row.id == id {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    pub fn list_integrations(&self, tenant_id: &str) -> Result<Vec<Integration>, StorageError> {
        decode_iter(self.integrations.scan_prefix(scope_prefix(tenant_id)))
    }

    // --- Automations ---

    pub fn create_automation(
        &self,
        tenant_id: &str,
        name: String,
        event: String,
        enabled: bool,
        target_webhook: String,
    ) -> Result<Automation, StorageError> {
        let automation = Automation {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name,
            event,
            enabled,
            target_webhook,
        };
        self.automations.insert(
            scoped_key(tenant_id, &automation.id),
            serde_json::to_vec(&automation)?,
        )?;
        Ok(automation)
    }

    pub fn list_automations(&self, tenant_id: &str) -> Result<Vec<Automation>, StorageError> {
        decode_iter(self.automations.scan_prefix(scope_prefix(tenant_id)))
    }
}

fn scope_prefix(tenant_id: &str) -> Vec<u8> {
    format!("{}/", tenant_id).into_bytes()
}

fn scoped_key(tenant_id: &str, suffix: &str) -> Vec<u8> {
    format!("{}/{}", tenant_id, suffix).into_bytes()
}

fn remove_batch(tree: &Tree, prefix: &[u8]) -> Result<sled::Batch, StorageError> {
    let mut batch = sled::Batch::default();
    for entry in tree.scan_prefix(prefix) {
        let (key, _) = entry?;
        batch.remove(key);
    }
    Ok(batch)
}

fn decode_opt<T: DeserializeOwned>(value: Option<sled::IVec>) -> Result<Option<T>, StorageError> {
    match value {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn decode_iter<T: DeserializeOwned>(iter: sled::Iter) -> Result<Vec<T>, StorageError> {
    let mut rows = Vec::new();
    for entry in iter {
        let (_, value) = entry?;
        rows.push(serde_json::from_slice(&value)?);
    }
    Ok(rows)
}
