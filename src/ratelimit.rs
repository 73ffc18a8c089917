//! Session request rate limiting.
//!
//! Sliding window over access events recorded in a dedicated collection:
//! each admitted call inserts a `{session_id, timestamp}` row, then counts
//! the rows for that session inside the live window. Insert-then-count
//! keeps the mechanism correct without a precomputed counter. Limiting is
//! keyed by session, not by resource id, and makes no assumption that a
//! session owns exactly one resource.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::error::{MwsError, QuotaKind, Result};
use crate::store::{Document, DocumentStore};

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn DocumentStore>,
    collection: String,
    quota: u64,
    expiry_secs: i64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        quota: u64,
        expiry_secs: i64,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            quota,
            expiry_secs,
        }
    }

    /// Records this access and admits it unless the session has exceeded
    /// its quota within the current window.
    pub async fn admit(&self, session_id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let event = as_document(json!({ "session_id": session_id, "timestamp": now }));
        self.store.insert_many(&self.collection, &[event]).await?;

        let window_start = now - self.expiry_secs * 1000;
        let query = as_document(json!({
            "session_id": session_id,
            "timestamp": { "$gt": window_start }
        }));
        let accesses = self.store.count(&self.collection, &query, 0, 0).await?;
        if accesses > self.quota {
            return Err(MwsError::quota(QuotaKind::RateLimit, "Rate limit exceeded"));
        }
        Ok(())
    }
}

fn as_document(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Document::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limiter(quota: u64, expiry_secs: i64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            "server_ratelimit",
            quota,
            expiry_secs,
        )
    }

    #[tokio::test]
    async fn test_admits_up_to_quota() -> Result<()> {
        let limiter = limiter(3, 60);
        for _ in 0..3 {
            limiter.admit("sess1").await?;
        }
        let err = limiter.admit("sess1").await.unwrap_err();
        assert_eq!(err.status(), 429);
        Ok(())
    }

    #[tokio::test]
    async fn test_sessions_are_independent() -> Result<()> {
        let limiter = limiter(1, 60);
        limiter.admit("sess1").await?;
        limiter.admit("sess2").await?;

        assert!(limiter.admit("sess1").await.is_err());
        assert!(limiter.admit("sess2").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_window_expires() -> Result<()> {
        // Zero-second window: every event is already outside it.
        let limiter = limiter(1, 0);
        limiter.admit("sess1").await?;
        limiter.admit("sess1").await?;
        limiter.admit("sess1").await?;
        Ok(())
    }
}
