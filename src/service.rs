//! Shell service context.
//!
//! One [`ShellService`] is constructed at startup around the shared store
//! client and configuration, then handed read-only to every request. Its
//! methods are the complete operation boundary of the core; the HTTP layer
//! is a thin translation over them.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::cursor::{BatchSize, CursorPager, Page};
use crate::error::{MwsError, Result};
use crate::ratelimit::RateLimiter;
use crate::store::{Document, DocumentStore, FindOptions, UpdateSummary};
use crate::tenant::{QuotaGuard, ScopedDb, TenantRegistry};

/// Arguments of a find call, including the continuation token fields for
/// resuming a paged query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindRequest {
    #[serde(default)]
    pub query: Option<Document>,
    #[serde(default)]
    pub projection: Option<Document>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub sort: Option<Document>,
    /// Zero starts a new query; nonzero resumes an open one.
    #[serde(default)]
    pub cursor_id: u64,
    /// Documents the client has consumed so far, on resume.
    #[serde(default)]
    pub retrieved: u64,
    /// The total captured when the query first ran, on resume.
    #[serde(default)]
    pub total_count: Option<u64>,
    /// Page size: absent for the server default, zero to drain.
    #[serde(default)]
    pub batch_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountRequest {
    #[serde(default)]
    pub query: Option<Document>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default)]
    pub limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub query: Option<Document>,
    pub update: Option<Document>,
    #[serde(default)]
    pub upsert: bool,
    #[serde(default)]
    pub multi: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoveRequest {
    #[serde(default)]
    pub constraint: Option<Document>,
    #[serde(default)]
    pub just_one: bool,
}

/// Result of resource creation.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub res_id: String,
    pub is_new: bool,
}

/// Process-wide service context. Cheap to clone; all request handling goes
/// through one shared instance.
#[derive(Clone)]
pub struct ShellService {
    store: Arc<dyn DocumentStore>,
    registry: TenantRegistry,
    quota: QuotaGuard,
    limiter: RateLimiter,
    pager: Arc<CursorPager>,
    config: Arc<Config>,
}

impl ShellService {
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        let registry = TenantRegistry::new(
            store.clone(),
            config.clients_collection.clone(),
            config.quota_num_collections,
        );
        let quota = QuotaGuard::new(store.clone(), config.quota_collection_size);
        let limiter = RateLimiter::new(
            store.clone(),
            config.ratelimit_collection.clone(),
            config.ratelimit_quota,
            config.ratelimit_expiry_secs,
        );
        let pager = Arc::new(CursorPager::new(store.clone(), config.default_batch_size));
        Self {
            store,
            registry,
            quota,
            limiter,
            pager,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The tenant registry, exposed so an external reaper can drive the
    /// enumerate/remove primitives directly.
    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    async fn scoped(&self, res_id: &str, session_id: &str) -> Result<ScopedDb> {
        ScopedDb::acquire(
            self.store.clone(),
            self.registry.clone(),
            self.quota.clone(),
            res_id,
            session_id,
        )
        .await
    }

    /// Finds or creates the resource owned by this session.
    pub async fn create_resource(&self, session_id: &str) -> Result<ResourceHandle> {
        let (res_id, is_new) = self.registry.create_resource(session_id).await?;
        if is_new {
            info!(res_id = %res_id, "new shell resource created");
        }
        Ok(ResourceHandle { res_id, is_new })
    }

    /// Refreshes the tenant's activity timestamp.
    pub async fn keep_alive(&self, session_id: &str, res_id: &str) -> Result<()> {
        self.require_access(res_id, session_id).await?;
        self.registry.touch(res_id, session_id).await
    }

    /// Executes or resumes a paged find.
    pub async fn find(
        &self,
        session_id: &str,
        res_id: &str,
        collection: &str,
        request: FindRequest,
    ) -> Result<Page> {
        self.limiter.admit(session_id).await?;
        let db = self.scoped(res_id, session_id).await?;
        let batch = batch_size(&request);

        if request.cursor_id != 0 {
            let total = request.total_count.ok_or_else(|| {
                MwsError::bad_request("Resuming a cursor requires the original total_count")
            })?;
            return self
                .pager
                .resume(request.cursor_id, request.retrieved, total, batch)
                .await;
        }

        let coll = db.collection(collection)?;
        let query = sanitize_query(request.query.unwrap_or_default());
        let options = FindOptions {
            projection: request.projection.clone(),
            skip: request.skip,
            limit: request.limit,
            sort: sort_spec(request.sort.as_ref()),
        };

        let total = coll.count(&query, request.skip, request.limit).await?;
        let store_cursor = coll.open_cursor(&query, &options).await?;
        self.pager.first_page(store_cursor, total, batch).await
    }

    /// Matching-document count, honoring skip/limit only when either is set.
    pub async fn count(
        &self,
        session_id: &str,
        res_id: &str,
        collection: &str,
        request: CountRequest,
    ) -> Result<u64> {
        self.limiter.admit(session_id).await?;
        let db = self.scoped(res_id, session_id).await?;
        let coll = db.collection(collection)?;
        let query = sanitize_query(request.query.unwrap_or_default());
        coll.count(&query, request.skip, request.limit).await
    }

    /// Inserts a document or a list of documents. Returns the written ids.
    pub async fn insert(
        &self,
        session_id: &str,
        res_id: &str,
        collection: &str,
        document: Value,
    ) -> Result<Vec<Value>> {
        self.limiter.admit(session_id).await?;
        let db = self.scoped(res_id, session_id).await?;
        let docs = documents_from(document)?;
        db.collection(collection)?.insert(&docs).await
    }

    /// Applies an update with optional upsert/multi.
    pub async fn update(
        &self,
        session_id: &str,
        res_id: &str,
        collection: &str,
        request: UpdateRequest,
    ) -> Result<UpdateSummary> {
        self.limiter.admit(session_id).await?;
        let (Some(query), Some(update)) = (request.query, request.update) else {
            return Err(MwsError::bad_request(
                "update requires spec and document arguments",
            ));
        };
        let db = self.scoped(res_id, session_id).await?;
        let query = sanitize_query(query);
        db.collection(collection)?
            .update(&query, &update, request.upsert, request.multi)
            .await
    }

    /// Saves a document, inserting or replacing by `_id`.
    pub async fn save(
        &self,
        session_id: &str,
        res_id: &str,
        collection: &str,
        document: Value,
    ) -> Result<UpdateSummary> {
        self.limiter.admit(session_id).await?;
        let db = self.scoped(res_id, session_id).await?;
        let Value::Object(doc) = document else {
            return Err(MwsError::bad_request("save requires a document object"));
        };
        db.collection(collection)?.save(&doc).await
    }

    /// Removes matching documents. Returns the number removed.
    pub async fn remove(
        &self,
        session_id: &str,
        res_id: &str,
        collection: &str,
        request: RemoveRequest,
    ) -> Result<u64> {
        self.limiter.admit(session_id).await?;
        let db = self.scoped(res_id, session_id).await?;
        let constraint = sanitize_query(request.constraint.unwrap_or_default());
        db.collection(collection)?
            .remove(&constraint, request.just_one)
            .await
    }

    /// Runs an aggregation pipeline.
    pub async fn aggregate(
        &self,
        session_id: &str,
        res_id: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>> {
        let db = self.scoped(res_id, session_id).await?;
        db.collection(collection)?.aggregate(&pipeline).await
    }

    /// Drops one collection, physically and from the registry.
    pub async fn drop_collection(
        &self,
        session_id: &str,
        res_id: &str,
        collection: &str,
    ) -> Result<()> {
        self.limiter.admit(session_id).await?;
        let db = self.scoped(res_id, session_id).await?;
        db.collection(collection)?.drop().await
    }

    /// Drops every collection the tenant has.
    pub async fn drop_database(&self, session_id: &str, res_id: &str) -> Result<()> {
        let db = self.scoped(res_id, session_id).await?;
        for name in db.collection_names().await? {
            db.collection(&name)?.drop().await?;
        }
        Ok(())
    }

    /// Logical collection names registered for the tenant.
    pub async fn collection_names(
        &self,
        session_id: &str,
        res_id: &str,
    ) -> Result<Vec<String>> {
        let db = self.scoped(res_id, session_id).await?;
        db.collection_names().await
    }

    /// Expires tenants idle longer than the configured duration: drops
    /// their collections, then their control records. Returns how many
    /// tenants were expired. This is the composition of the registry's
    /// reaper primitives, for the external sweeper to drive.
    pub async fn expire_idle_tenants(&self) -> Result<usize> {
        let cutoff =
            Utc::now().timestamp_millis() - self.config.expire_session_duration_secs * 1000;
        let idle = self.registry.idle_tenants(cutoff).await?;
        let mut expired = 0;
        for record in idle {
            let db = ScopedDb::internal(
                self.store.clone(),
                self.registry.clone(),
                self.quota.clone(),
                &record.res_id,
            );
            let mut dropped_all = true;
            for name in record.collections {
                if let Err(err) = db.collection(&name)?.drop().await {
                    warn!(res_id = %record.res_id, collection = %name, error = %err,
                        "failed to drop collection during expiry, keeping tenant");
                    dropped_all = false;
                    break;
                }
            }
            if dropped_all {
                self.registry.remove_tenant(&record.res_id).await?;
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "expired idle tenants");
        }
        Ok(expired)
    }

    async fn require_access(&self, res_id: &str, session_id: &str) -> Result<()> {
        if !self.registry.user_has_access(res_id, session_id).await? {
            return Err(MwsError::forbidden(
                "Session error. User does not have access to res_id",
            ));
        }
        Ok(())
    }
}

fn batch_size(request: &FindRequest) -> BatchSize {
    match request.batch_size {
        None => BatchSize::Default,
        Some(0) => BatchSize::Drain,
        Some(n) => BatchSize::Exact(n as usize),
    }
}

fn sort_spec(sort: Option<&Document>) -> Vec<(String, i8)> {
    sort.map(|spec| {
        spec.iter()
            .map(|(field, direction)| {
                let direction = if direction.as_i64() == Some(-1) { -1 } else { 1 };
                (field.clone(), direction)
            })
            .collect()
    })
    .unwrap_or_default()
}

/// Coerces the `document` argument of insert into a batch.
fn documents_from(value: Value) -> Result<Vec<Document>> {
    match value {
        Value::Object(doc) => Ok(vec![doc]),
        Value::Array(items) => {
            let mut docs = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(doc) => docs.push(doc),
                    _ => {
                        return Err(MwsError::bad_request(
                            "insert accepts a document or a list of documents",
                        ))
                    }
                }
            }
            Ok(docs)
        }
        _ => Err(MwsError::bad_request(
            "insert accepts a document or a list of documents",
        )),
    }
}

/// Strips `$where` clauses anywhere in a query. Server-side code execution
/// never reaches the store.
fn sanitize_query(mut query: Document) -> Document {
    fn strip(value: &mut Value) {
        if let Value::Object(map) = value {
            map.remove("$where");
            for (_, nested) in map.iter_mut() {
                strip(nested);
            }
        } else if let Value::Array(items) = value {
            for item in items.iter_mut() {
                strip(item);
            }
        }
    }

    if query.remove("$where").is_some() {
        warn!("stripped $where clause from query");
    }
    for (_, value) in query.iter_mut() {
        strip(value);
    }
    query
}
