//! Tenant registry, backed by the shared control collection.
//!
//! One record per resource id tracks the owning session, the set of logical
//! collection names believed to exist and the last-activity timestamp. Set
//! membership is maintained with the store's atomic `$addToSet` / `$pull`
//! updates so concurrent writers for one tenant cannot lose each other's
//! changes. The collection-count quota check before an add is deliberately
//! check-then-act: a best-effort limit, not a distributed transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{MwsError, QuotaKind, Result};
use crate::store::{Document, DocumentStore};
use crate::tenant::namespace::TenantPrefix;

/// One tenant's control record, as stored in the clients collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    #[serde(default)]
    pub version: u32,
    pub res_id: String,
    pub session_id: String,
    #[serde(default)]
    pub collections: Vec<String>,
    /// Last activity, Unix milliseconds.
    pub timestamp: i64,
}

/// Registry of tenants and their collection sets.
#[derive(Clone)]
pub struct TenantRegistry {
    store: Arc<dyn DocumentStore>,
    clients_collection: String,
    quota_num_collections: Option<u64>,
}

impl TenantRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clients_collection: impl Into<String>,
        quota_num_collections: Option<u64>,
    ) -> Self {
        Self {
            store,
            clients_collection: clients_collection.into(),
            quota_num_collections,
        }
    }

    /// Finds the resource owned by `session_id`, creating one on first use.
    /// Returns the resource id and whether it was newly created.
    pub async fn create_resource(&self, session_id: &str) -> Result<(String, bool)> {
        let query = as_document(json!({ "session_id": session_id }));
        if let Some(existing) = self
            .store
            .find_one(&self.clients_collection, &query, None)
            .await?
        {
            let res_id = existing
                .get("res_id")
                .and_then(Value::as_str)
                .ok_or_else(|| MwsError::internal("tenant record is missing res_id"))?;
            return Ok((res_id.to_string(), false));
        }

        let res_id = uuid::Uuid::new_v4().to_string();
        let record = TenantRecord {
            version: 1,
            res_id: res_id.clone(),
            session_id: session_id.to_string(),
            collections: Vec::new(),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.store
            .insert_many(&self.clients_collection, &[to_document(&record)?])
            .await?;
        debug!(res_id = %res_id, "created tenant resource");
        Ok((res_id, true))
    }

    /// Whether `session_id` owns the resource `res_id`.
    pub async fn user_has_access(&self, res_id: &str, session_id: &str) -> Result<bool> {
        let query = as_document(json!({ "res_id": res_id, "session_id": session_id }));
        let found = self
            .store
            .find_one(&self.clients_collection, &query, None)
            .await?;
        Ok(found.is_some())
    }

    /// The tenant record for `res_id`, if one exists.
    pub async fn record(&self, res_id: &str) -> Result<Option<TenantRecord>> {
        let query = as_document(json!({ "res_id": res_id }));
        let found = self
            .store
            .find_one(&self.clients_collection, &query, None)
            .await?;
        found.map(from_document).transpose()
    }

    /// Logical collection names registered for `res_id`. An unknown tenant
    /// has no collections, which is not an error.
    pub async fn collections_of(&self, res_id: &str) -> Result<Vec<String>> {
        Ok(self
            .record(res_id)
            .await?
            .map(|record| record.collections)
            .unwrap_or_default())
    }

    /// Adds a logical collection name to the tenant's set. Idempotent:
    /// re-registering a known name never fails, regardless of quota. Adding
    /// a new name past the configured collection-count quota fails without
    /// mutating state.
    pub async fn register_collection(
        &self,
        prefix: &TenantPrefix,
        name: &str,
    ) -> Result<()> {
        let logical = prefix.strip_if_qualified(name);

        if let Some(limit) = self.quota_num_collections {
            let current: BTreeSet<String> = self
                .collections_of(prefix.res_id())
                .await?
                .into_iter()
                .collect();
            if !current.contains(logical) && current.len() as u64 + 1 > limit {
                return Err(MwsError::quota(
                    QuotaKind::CollectionCount,
                    "Max number of collections exceeded",
                ));
            }
        }

        let query = as_document(json!({ "res_id": prefix.res_id() }));
        let update = as_document(json!({ "$addToSet": { "collections": logical } }));
        self.store
            .update_many(&self.clients_collection, &query, &update, false, true)
            .await?;
        Ok(())
    }

    /// Removes a logical collection name from the tenant's set. Idempotent,
    /// never fails on an absent name or tenant.
    pub async fn deregister_collection(
        &self,
        prefix: &TenantPrefix,
        name: &str,
    ) -> Result<()> {
        let logical = prefix.strip_if_qualified(name);
        let query = as_document(json!({ "res_id": prefix.res_id() }));
        let update = as_document(json!({ "$pull": { "collections": logical } }));
        self.store
            .update_many(&self.clients_collection, &query, &update, false, true)
            .await?;
        Ok(())
    }

    /// Refreshes the tenant's last-activity timestamp.
    pub async fn touch(&self, res_id: &str, session_id: &str) -> Result<()> {
        let query = as_document(json!({ "res_id": res_id, "session_id": session_id }));
        let update =
            as_document(json!({ "$set": { "timestamp": Utc::now().timestamp_millis() } }));
        self.store
            .update_many(&self.clients_collection, &query, &update, false, false)
            .await?;
        Ok(())
    }

    /// Tenants whose last activity predates `cutoff_millis`. Primitive for
    /// the expiry sweeper.
    pub async fn idle_tenants(&self, cutoff_millis: i64) -> Result<Vec<TenantRecord>> {
        let query = as_document(json!({ "timestamp": { "$lt": cutoff_millis } }));
        let cursor = self
            .store
            .open_cursor(&self.clients_collection, &query, &Default::default())
            .await?;
        let mut records = Vec::new();
        loop {
            let batch = self.store.read_batch(cursor, 64).await?;
            if batch.is_empty() {
                break;
            }
            for doc in batch {
                records.push(from_document(doc)?);
            }
        }
        self.store.kill_cursor(cursor).await?;
        Ok(records)
    }

    /// Deletes a tenant's control record. Primitive for the expiry sweeper;
    /// the caller is responsible for dropping the tenant's collections first.
    pub async fn remove_tenant(&self, res_id: &str) -> Result<()> {
        let query = as_document(json!({ "res_id": res_id }));
        self.store
            .remove(&self.clients_collection, &query, false)
            .await?;
        Ok(())
    }
}

fn as_document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn to_document(record: &TenantRecord) -> Result<Document> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(MwsError::internal("failed to serialize tenant record")),
    }
}

fn from_document(doc: Document) -> Result<TenantRecord> {
    serde_json::from_value(Value::Object(doc))
        .map_err(|e| MwsError::internal(format!("malformed tenant record: {}", e)))
}
