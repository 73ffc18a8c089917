//! Per-collection byte-size quota.
//!
//! Projected growth is checked before any mutating call reaches the store,
//! so a rejected write leaves no partial state behind. For updates the
//! projection is update-document size times matched-document count, a
//! worst-case estimate that can only over-count.

use std::sync::Arc;

use crate::error::{MwsError, QuotaKind, Result};
use crate::store::{document_size, Document, DocumentStore};

/// Checks projected collection sizes against the configured byte quota.
#[derive(Clone)]
pub struct QuotaGuard {
    store: Arc<dyn DocumentStore>,
    quota_collection_size: u64,
}

impl QuotaGuard {
    pub fn new(store: Arc<dyn DocumentStore>, quota_collection_size: u64) -> Self {
        Self {
            store,
            quota_collection_size,
        }
    }

    /// Current byte size of a physical collection. A collection that does
    /// not exist yet has size zero.
    pub async fn collection_size(&self, physical: &str) -> Result<u64> {
        let stats = self.store.collection_stats(physical).await?;
        Ok(stats.map(|s| s.size_bytes).unwrap_or(0))
    }

    /// Admits or rejects a write projected to add `incoming_bytes` to the
    /// physical collection.
    pub async fn check_write_size(&self, physical: &str, incoming_bytes: u64) -> Result<()> {
        let current = self.collection_size(physical).await?;
        if current + incoming_bytes > self.quota_collection_size {
            return Err(MwsError::quota(
                QuotaKind::CollectionSize,
                "Collection size exceeded",
            ));
        }
        Ok(())
    }
}

/// Serialized size of an incoming document batch.
pub fn batch_size_bytes(docs: &[Document]) -> u64 {
    docs.iter().map(document_size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_missing_collection_has_size_zero() -> Result<()> {
        let guard = QuotaGuard::new(Arc::new(MemoryStore::new()), 100);
        assert_eq!(guard.collection_size("ghost").await?, 0);
        guard.check_write_size("ghost", 100).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_projected_overflow() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let payload = doc(json!({"a": "0123456789"}));
        let payload_size = document_size(&payload);
        store.insert_many("c", &[payload]).await.map_err(MwsError::from)?;

        let guard = QuotaGuard::new(store, payload_size + 10);
        guard.check_write_size("c", 10).await?;

        let err = guard.check_write_size("c", 11).await.unwrap_err();
        assert_eq!(err.status(), 403);
        Ok(())
    }

    #[test]
    fn test_batch_size_sums_documents() {
        let docs = vec![doc(json!({"a": 1})), doc(json!({"b": 2}))];
        assert_eq!(
            batch_size_bytes(&docs),
            document_size(&docs[0]) + document_size(&docs[1])
        );
    }
}
