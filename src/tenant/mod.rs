//! Tenant isolation layer
//!
//! # Architecture
//!
//! Every web-shell tenant ("resource", identified by a `res_id`) sees a
//! private logical database that is really a slice of one shared store:
//!
//! ```text
//! logical name            physical name
//! "widgets"          →    "<res_id>widgets"
//! ```
//!
//! - [`namespace`] does the pure logical↔physical name mapping
//! - [`registry`] tracks which collections each tenant owns, in a shared
//!   control collection, and enforces the collection-count quota
//! - [`quota`] enforces the per-collection byte-size quota before writes
//! - [`scope`] ties the three together behind a scoped handle so no call
//!   site touches the store with an untranslated name

pub mod namespace;
pub mod quota;
pub mod registry;
pub mod scope;

pub use namespace::{NamespaceMode, TenantPrefix};
pub use quota::QuotaGuard;
pub use registry::{TenantRecord, TenantRegistry};
pub use scope::{ScopedCollection, ScopedDb};
