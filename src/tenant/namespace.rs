//! Logical to physical collection-name translation.
//!
//! A tenant's physical collection name is its `res_id` prepended to the
//! logical name. Resource ids are fixed-length UUID strings, so no tenant's
//! prefix can be a proper prefix of another's and translated namespaces can
//! never collide across tenants.
//!
//! # Examples
//!
//! ```rust
//! use mwshell::tenant::{NamespaceMode, TenantPrefix};
//!
//! let prefix = TenantPrefix::new("0b9c63e2-41f7-4e57-92a5-4971a22c2d3f");
//! let physical = prefix.to_physical("widgets", NamespaceMode::TenantFacing).unwrap();
//! assert_eq!(physical, "0b9c63e2-41f7-4e57-92a5-4971a22c2d3fwidgets");
//! assert_eq!(prefix.to_logical(&physical).unwrap(), "widgets");
//! ```

use crate::error::{MwsError, Result};

/// Logical namespaces owned by the backing store itself. A tenant must
/// never reach them through translation.
const RESERVED_PREFIXES: &[&str] = &["system.", "oplog.$main", "$cmd"];

/// Who is asking for the translation. Internal callers (registry
/// bookkeeping, the expiry sweep) may address reserved namespaces;
/// tenant-facing requests may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceMode {
    TenantFacing,
    Internal,
}

/// The namespacing prefix of one tenant. Pure value type, no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPrefix {
    res_id: String,
}

impl TenantPrefix {
    pub fn new(res_id: impl Into<String>) -> Self {
        Self {
            res_id: res_id.into(),
        }
    }

    pub fn res_id(&self) -> &str {
        &self.res_id
    }

    /// Maps a logical collection name to its physical name on the shared
    /// store. Reserved namespaces are `Forbidden` for tenant-facing calls.
    pub fn to_physical(&self, logical: &str, mode: NamespaceMode) -> Result<String> {
        if logical.is_empty() {
            return Err(MwsError::bad_request("Collection name may not be empty"));
        }
        if is_reserved(logical) && mode == NamespaceMode::TenantFacing {
            return Err(MwsError::forbidden(format!(
                "Access to collection {} is not allowed",
                logical
            )));
        }
        Ok(format!("{}{}", self.res_id, logical))
    }

    /// Inverse of [`to_physical`](Self::to_physical). Fails when `physical`
    /// does not belong to this tenant.
    pub fn to_logical(&self, physical: &str) -> Result<String> {
        match physical.strip_prefix(self.res_id.as_str()) {
            Some(logical) if !logical.is_empty() => Ok(logical.to_string()),
            _ => Err(MwsError::bad_request(format!(
                "Collection {} does not belong to this resource",
                physical
            ))),
        }
    }

    /// Normalizes a name that may arrive either logical or already
    /// qualified, returning the logical form. Used by registry bookkeeping.
    pub fn strip_if_qualified<'a>(&self, name: &'a str) -> &'a str {
        match name.strip_prefix(self.res_id.as_str()) {
            Some(logical) if !logical.is_empty() => logical,
            _ => name,
        }
    }
}

fn is_reserved(logical: &str) -> bool {
    RESERVED_PREFIXES
        .iter()
        .any(|reserved| logical.starts_with(reserved))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(id: &str) -> TenantPrefix {
        TenantPrefix::new(id)
    }

    #[test]
    fn test_round_trip() {
        let p = prefix("res1.");
        let physical = p.to_physical("widgets", NamespaceMode::TenantFacing).unwrap();
        assert_eq!(physical, "res1.widgets");
        assert_eq!(p.to_logical(&physical).unwrap(), "widgets");
    }

    #[test]
    fn test_distinct_tenants_never_collide() {
        // Fixed-length ids, as issued by resource creation.
        let a = prefix("aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa");
        let b = prefix("bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb");
        let from_a = a.to_physical("items", NamespaceMode::TenantFacing).unwrap();
        let from_b = b.to_physical("items", NamespaceMode::TenantFacing).unwrap();
        assert_ne!(from_a, from_b);
        assert!(b.to_logical(&from_a).is_err());
    }

    #[test]
    fn test_foreign_physical_name_rejected() {
        let p = prefix("res1.");
        assert!(p.to_logical("res2.widgets").is_err());
        assert!(p.to_logical("res1.").is_err());
    }

    #[test]
    fn test_reserved_names_forbidden_for_tenants() {
        let p = prefix("res1.");
        for name in ["system.indexes", "oplog.$main", "$cmd"] {
            let err = p.to_physical(name, NamespaceMode::TenantFacing).unwrap_err();
            assert_eq!(err.status(), 403);
        }
    }

    #[test]
    fn test_reserved_names_allowed_internally() {
        let p = prefix("res1.");
        let physical = p.to_physical("$cmd", NamespaceMode::Internal).unwrap();
        assert_eq!(physical, "res1.$cmd");
    }

    #[test]
    fn test_empty_name_rejected() {
        let p = prefix("res1.");
        let err = p.to_physical("", NamespaceMode::TenantFacing).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_strip_if_qualified() {
        let p = prefix("res1.");
        assert_eq!(p.strip_if_qualified("res1.widgets"), "widgets");
        assert_eq!(p.strip_if_qualified("widgets"), "widgets");
    }
}
