//! Backing document-store client boundary
//!
//! # Architecture
//!
//! The shell core never talks to a storage engine directly. Everything goes
//! through the [`DocumentStore`] trait, which models the collection-level
//! surface of a schemaless document database:
//!
//! - query execution through server-side cursors (open / read / kill)
//! - write primitives (insert, update with operators, remove, drop)
//! - aggregation pipelines and collection statistics
//!
//! The trait is the seam for tenant isolation: callers above it pass
//! *physical* (namespace-qualified) collection names, and the store neither
//! knows nor cares about tenants.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and the
//! development server.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::MwsError;

pub use memory::MemoryStore;

/// A schemaless document: a JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Store-level failures, distinguishable so the scope boundary can map them
/// onto the shell error envelope without string matching.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cursor {0} not found")]
    CursorNotFound(u64),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("operation failed: {0}")]
    Failed(String),
}

impl From<StoreError> for MwsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CursorNotFound(id) => MwsError::CursorNotFound {
                reason: format!("cursor {} is not open on the server", id),
            },
            StoreError::InvalidQuery(reason) => MwsError::bad_request(reason),
            StoreError::Failed(reason) => MwsError::storage(reason),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Options applied when a query cursor is opened.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Field projection, `None` returns full documents.
    pub projection: Option<Document>,
    /// Documents to skip before the first result.
    pub skip: u64,
    /// Maximum documents the cursor will ever yield; 0 means unbounded.
    pub limit: u64,
    /// Sort specification as (field, direction) pairs, direction 1 or -1.
    pub sort: Vec<(String, i8)>,
}

/// Outcome of an update call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSummary {
    pub matched: u64,
    pub modified: u64,
    /// Primary key of the document created by an upsert, if one was.
    pub upserted_id: Option<Value>,
}

/// Collection statistics, as reported by the store.
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    /// Total serialized size of the collection's documents in bytes.
    pub size_bytes: u64,
    pub doc_count: u64,
}

/// Collection-level client for the backing document store.
///
/// Implementations must be `Send + Sync`; one shared handle serves all
/// concurrent requests. Server-side cursors are identified by plain `u64`
/// ids and stay open until read to exhaustion or explicitly killed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Executes a query and returns the id of a server-side cursor
    /// positioned before the first result.
    async fn open_cursor(
        &self,
        collection: &str,
        query: &Document,
        options: &FindOptions,
    ) -> StoreResult<u64>;

    /// Reads up to `max_docs` documents from an open cursor. An empty batch
    /// means the cursor is exhausted. Fails with [`StoreError::CursorNotFound`]
    /// when the cursor has been killed or expired.
    async fn read_batch(&self, cursor_id: u64, max_docs: usize) -> StoreResult<Vec<Document>>;

    /// Releases a server-side cursor. Killing an unknown cursor is a no-op.
    async fn kill_cursor(&self, cursor_id: u64) -> StoreResult<()>;

    /// Counts documents matching `query`, honoring skip/limit when nonzero.
    async fn count(
        &self,
        collection: &str,
        query: &Document,
        skip: u64,
        limit: u64,
    ) -> StoreResult<u64>;

    /// Returns the first matching document, if any.
    async fn find_one(
        &self,
        collection: &str,
        query: &Document,
        projection: Option<&Document>,
    ) -> StoreResult<Option<Document>>;

    /// Inserts documents, assigning `_id`s where missing.
    /// Returns the primary keys of the written documents.
    async fn insert_many(&self, collection: &str, docs: &[Document]) -> StoreResult<Vec<Value>>;

    /// Applies an update document (operator form or full replacement) to
    /// documents matching `query`. Atomic per document; `$addToSet` and
    /// `$pull` on one document never lose concurrent updates.
    async fn update_many(
        &self,
        collection: &str,
        query: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> StoreResult<UpdateSummary>;

    /// Removes matching documents, or only the first when `just_one`.
    /// Returns the number removed.
    async fn remove(
        &self,
        collection: &str,
        query: &Document,
        just_one: bool,
    ) -> StoreResult<u64>;

    /// Drops a collection and its documents. Dropping a collection that
    /// does not exist succeeds quietly; a failure means the collection may
    /// still hold data.
    async fn drop_collection(&self, collection: &str) -> StoreResult<()>;

    /// Runs an aggregation pipeline and drains the result.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Document],
    ) -> StoreResult<Vec<Document>>;

    /// Statistics for a collection, `None` when it does not exist.
    async fn collection_stats(&self, collection: &str) -> StoreResult<Option<CollectionStats>>;
}

/// Serialized size of a document in bytes, the unit the byte-size quota is
/// accounted in.
pub fn document_size(doc: &Document) -> u64 {
    // Serialization of a Map<String, Value> cannot fail.
    serde_json::to_vec(&Value::Object(doc.clone()))
        .map(|v| v.len() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_size_counts_serialized_bytes() {
        let doc: Document = json!({"a": 1}).as_object().unwrap().clone();
        assert_eq!(document_size(&doc), br#"{"a":1}"#.len() as u64);

        let empty = Document::new();
        assert_eq!(document_size(&empty), 2);
    }

    #[test]
    fn test_store_error_maps_to_envelope() {
        let err: MwsError = StoreError::CursorNotFound(42).into();
        assert_eq!(err.status(), 400);

        let err: MwsError = StoreError::InvalidQuery("bad operator".into()).into();
        assert_eq!(err.status(), 400);

        let err: MwsError = StoreError::Failed("io error".into()).into();
        assert_eq!(err.status(), 500);
    }
}
