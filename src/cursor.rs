//! Paged query cursors.
//!
//! A logical query moves through four states:
//!
//! ```text
//! NotStarted --first page--> Open --resume--> Open
//!                              |                |
//!                              |  all retrieved | store expired it
//!                              v                v
//!                          Exhausted ------> Killed
//! ```
//!
//! The pager maps each open server-side store cursor to a client-visible
//! cursor id. The client round-trips `{cursor_id, retrieved, total_count}`
//! between requests; the server keeps only the id mapping. `total_count` is
//! captured once when the query first runs and trusted on every resume.
//! Under concurrent writes to the underlying collection the count can go
//! stale; recomputing it per page would make pagination itself
//! inconsistent, so staleness is the accepted trade-off.
//!
//! Store cursors are scarce, so exhaustion kills them proactively instead
//! of waiting out the store's idle timeout. Resuming an id the pager does
//! not know fails with `CursorNotFound`; the client restarts the query.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{MwsError, Result};
use crate::store::{Document, DocumentStore, StoreError};

/// How many documents one page may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSize {
    /// The server's configured default.
    Default,
    /// An explicit page size.
    Exact(usize),
    /// Everything the query has left, in one response.
    Drain,
}

/// One page of results. `cursor_id` is zero when the query is exhausted
/// and nonzero when the client may resume.
#[derive(Debug, Clone)]
pub struct Page {
    pub result: Vec<Document>,
    /// Total match count of the query, captured at first execution.
    pub count: u64,
    pub cursor_id: u64,
}

struct OpenCursor {
    store_cursor: u64,
}

/// Maps client-visible cursor ids to open store cursors.
pub struct CursorPager {
    store: Arc<dyn DocumentStore>,
    cursors: DashMap<u64, OpenCursor>,
    next_id: AtomicU64,
    default_batch: usize,
}

impl CursorPager {
    pub fn new(store: Arc<dyn DocumentStore>, default_batch: usize) -> Self {
        Self {
            store,
            cursors: DashMap::new(),
            next_id: AtomicU64::new(1),
            default_batch,
        }
    }

    /// Cursors currently held open. Exposed for tests and introspection.
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    /// First page of a freshly executed query. `store_cursor` must be a
    /// cursor the caller just opened; `total` its match count. When the
    /// first page drains the query, the store cursor is killed immediately
    /// and no pager id is allocated.
    pub async fn first_page(
        &self,
        store_cursor: u64,
        total: u64,
        batch: BatchSize,
    ) -> Result<Page> {
        let take = self.batch_quota(batch, total, 0);
        let result = self.store.read_batch(store_cursor, take).await?;

        if result.len() as u64 >= total {
            self.store.kill_cursor(store_cursor).await?;
            return Ok(Page {
                result,
                count: total,
                cursor_id: 0,
            });
        }

        let cursor_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.cursors.insert(cursor_id, OpenCursor { store_cursor });
        debug!(cursor_id, total, returned = result.len(), "opened paged cursor");
        Ok(Page {
            result,
            count: total,
            cursor_id,
        })
    }

    /// Next page of an open query. `retrieved` and `total` come from the
    /// client's continuation token; `total` is never recomputed. On
    /// exhaustion the store cursor is killed and the returned `cursor_id`
    /// is zero.
    pub async fn resume(
        &self,
        cursor_id: u64,
        retrieved: u64,
        total: u64,
        batch: BatchSize,
    ) -> Result<Page> {
        let store_cursor = self
            .cursors
            .get(&cursor_id)
            .map(|entry| entry.store_cursor)
            .ok_or_else(|| MwsError::CursorNotFound {
                reason: format!("no open cursor with id {}", cursor_id),
            })?;

        let take = self.batch_quota(batch, total, retrieved);
        let result = match self.store.read_batch(store_cursor, take).await {
            Ok(result) => result,
            Err(StoreError::CursorNotFound(_)) => {
                // The store expired it out from under us. Drop the mapping
                // so later resumes fail fast the same way.
                self.cursors.remove(&cursor_id);
                return Err(MwsError::CursorNotFound {
                    reason: format!("cursor {} has expired", cursor_id),
                });
            }
            Err(other) => return Err(other.into()),
        };

        let now_retrieved = retrieved + result.len() as u64;
        if now_retrieved >= total || result.is_empty() {
            self.kill(cursor_id).await?;
            debug!(cursor_id, now_retrieved, total, "paged cursor exhausted");
            return Ok(Page {
                result,
                count: total,
                cursor_id: 0,
            });
        }

        Ok(Page {
            result,
            count: total,
            cursor_id,
        })
    }

    /// Kills a paged cursor and its store cursor. Unknown ids are a no-op.
    pub async fn kill(&self, cursor_id: u64) -> Result<()> {
        if let Some((_, open)) = self.cursors.remove(&cursor_id) {
            self.store.kill_cursor(open.store_cursor).await?;
        }
        Ok(())
    }

    fn batch_quota(&self, batch: BatchSize, total: u64, retrieved: u64) -> usize {
        match batch {
            BatchSize::Default => self.default_batch,
            BatchSize::Exact(n) => n,
            // A drain still stays inside the captured total, which already
            // honors the query's limit.
            BatchSize::Drain => total.saturating_sub(retrieved).max(1) as usize,
        }
    }
}
