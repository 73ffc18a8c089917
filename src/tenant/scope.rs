//! Scoped database handle.
//!
//! [`ScopedDb`] is the only way request handling reaches tenant data. The
//! constructor validates that the calling session owns the resource and
//! refreshes its activity timestamp; every collection handle it yields
//! translates names through the tenant prefix and keeps the registry in
//! step with writes and drops. Per-call state lives on the handle itself,
//! so releasing it is ordinary scope exit on every path.
//!
//! Ordering rules, observable through the registry invariant:
//!
//! - collection-creating writes register first, then write, so the registry
//!   never under-reports a collection that was actually written
//! - drops remove the physical collection first and deregister only when
//!   the drop succeeded

use std::sync::Arc;

use tracing::debug;

use crate::error::{MwsError, Result};
use crate::store::{Document, DocumentStore, FindOptions, UpdateSummary};
use crate::tenant::namespace::{NamespaceMode, TenantPrefix};
use crate::tenant::quota::{batch_size_bytes, QuotaGuard};
use crate::tenant::registry::TenantRegistry;

/// A tenant-scoped view of the shared store, valid for one unit of work.
pub struct ScopedDb {
    store: Arc<dyn DocumentStore>,
    registry: TenantRegistry,
    quota: QuotaGuard,
    prefix: TenantPrefix,
    mode: NamespaceMode,
}

impl std::fmt::Debug for ScopedDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedDb")
            .field("prefix", &self.prefix)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl ScopedDb {
    /// Acquires a scope for a tenant-facing request. Fails with `Forbidden`
    /// when the session does not own the resource, and touches the tenant's
    /// activity timestamp on success.
    pub async fn acquire(
        store: Arc<dyn DocumentStore>,
        registry: TenantRegistry,
        quota: QuotaGuard,
        res_id: &str,
        session_id: &str,
    ) -> Result<Self> {
        if !registry.user_has_access(res_id, session_id).await? {
            return Err(MwsError::forbidden(
                "Session error. User does not have access to res_id",
            ));
        }
        registry.touch(res_id, session_id).await?;
        Ok(Self {
            store,
            registry,
            quota,
            prefix: TenantPrefix::new(res_id),
            mode: NamespaceMode::TenantFacing,
        })
    }

    /// Acquires a scope on behalf of the server itself (expiry sweeps,
    /// operator tooling). Skips the session check and may address reserved
    /// namespaces. Never reachable from a tenant-facing request.
    pub fn internal(
        store: Arc<dyn DocumentStore>,
        registry: TenantRegistry,
        quota: QuotaGuard,
        res_id: &str,
    ) -> Self {
        Self {
            store,
            registry,
            quota,
            prefix: TenantPrefix::new(res_id),
            mode: NamespaceMode::Internal,
        }
    }

    pub fn res_id(&self) -> &str {
        self.prefix.res_id()
    }

    /// Collection handle for a logical name. Translation happens here, so
    /// reserved or malformed names fail before any store call.
    pub fn collection(&self, logical: &str) -> Result<ScopedCollection<'_>> {
        let physical = self.prefix.to_physical(logical, self.mode)?;
        Ok(ScopedCollection {
            scope: self,
            logical: logical.to_string(),
            physical,
        })
    }

    /// Logical collection names currently registered for this tenant.
    pub async fn collection_names(&self) -> Result<Vec<String>> {
        self.registry.collections_of(self.prefix.res_id()).await
    }
}

/// A collection handle whose operations are namespace-translated and
/// registry-maintaining.
pub struct ScopedCollection<'a> {
    scope: &'a ScopedDb,
    logical: String,
    physical: String,
}

impl std::fmt::Debug for ScopedCollection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCollection")
            .field("logical", &self.logical)
            .field("physical", &self.physical)
            .finish_non_exhaustive()
    }
}

impl ScopedCollection<'_> {
    pub fn logical_name(&self) -> &str {
        &self.logical
    }

    pub fn physical_name(&self) -> &str {
        &self.physical
    }

    /// Opens a server-side cursor over this collection.
    pub async fn open_cursor(&self, query: &Document, options: &FindOptions) -> Result<u64> {
        Ok(self.scope.store.open_cursor(&self.physical, query, options).await?)
    }

    /// Matching-document count, honoring skip/limit when nonzero.
    pub async fn count(&self, query: &Document, skip: u64, limit: u64) -> Result<u64> {
        Ok(self.scope.store.count(&self.physical, query, skip, limit).await?)
    }

    /// Inserts documents after the byte-size and collection-count checks.
    /// Returns the written primary keys.
    pub async fn insert(&self, docs: &[Document]) -> Result<Vec<serde_json::Value>> {
        self.scope
            .quota
            .check_write_size(&self.physical, batch_size_bytes(docs))
            .await?;
        self.scope
            .registry
            .register_collection(&self.scope.prefix, &self.logical)
            .await?;
        let ids = self.scope.store.insert_many(&self.physical, docs).await?;
        debug!(collection = %self.logical, n = ids.len(), "inserted documents");
        Ok(ids)
    }

    /// Applies an update. The projected size increase is the update
    /// document's size times the number of matched documents, checked
    /// before anything is written. An upsert registers the collection
    /// before the write, like an insert.
    pub async fn update(
        &self,
        query: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> Result<UpdateSummary> {
        let affected = self.scope.store.count(&self.physical, query, 0, 0).await?;
        let projected = crate::store::document_size(update) * affected;
        self.scope
            .quota
            .check_write_size(&self.physical, projected)
            .await?;

        if upsert {
            self.scope
                .registry
                .register_collection(&self.scope.prefix, &self.logical)
                .await?;
        }
        Ok(self
            .scope
            .store
            .update_many(&self.physical, query, update, upsert, multi)
            .await?)
    }

    /// Saves a document: insert when it has no `_id`, replace-by-id upsert
    /// otherwise.
    pub async fn save(&self, doc: &Document) -> Result<UpdateSummary> {
        match doc.get("_id") {
            None => {
                let ids = self.insert(std::slice::from_ref(doc)).await?;
                Ok(UpdateSummary {
                    matched: 0,
                    modified: 0,
                    upserted_id: ids.into_iter().next(),
                })
            }
            Some(id) => {
                let mut query = Document::new();
                query.insert("_id".to_string(), id.clone());
                self.update(&query, doc, true, false).await
            }
        }
    }

    /// Removes matching documents. Returns the number removed.
    pub async fn remove(&self, query: &Document, just_one: bool) -> Result<u64> {
        Ok(self.scope.store.remove(&self.physical, query, just_one).await?)
    }

    /// Drops the physical collection, then deregisters it. A failed drop
    /// leaves the registry entry in place.
    pub async fn drop(&self) -> Result<()> {
        self.scope.store.drop_collection(&self.physical).await?;
        self.scope
            .registry
            .deregister_collection(&self.scope.prefix, &self.logical)
            .await?;
        debug!(collection = %self.logical, "dropped collection");
        Ok(())
    }

    /// Runs an aggregation pipeline.
    pub async fn aggregate(&self, pipeline: &[Document]) -> Result<Vec<Document>> {
        Ok(self.scope.store.aggregate(&self.physical, pipeline).await?)
    }

    /// Current byte size of the physical collection, zero when absent.
    pub async fn size(&self) -> Result<u64> {
        self.scope.quota.collection_size(&self.physical).await
    }
}
