// mwshell - Multi-tenant web shell database server
// Multiplexes many isolated logical databases onto one shared document store.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod cursor;
pub mod ratelimit;
pub mod server;
pub mod service;
pub mod store;
pub mod tenant;

// Re-exports for convenience
pub use config::Config;
pub use service::ShellService;
pub use store::{DocumentStore, MemoryStore};

/// mwshell error types
///
/// Every failure crossing the operation boundary is an [`error::MwsError`]
/// carrying an HTTP-style status, a human-readable reason and an optional
/// detail string. The HTTP layer renders it as the uniform JSON envelope
/// `{"error": <status>, "reason": <string>, "detail": <string>}`.
pub mod error {
    use thiserror::Error;

    /// Which quota was exhausted. The flavors map to different HTTP
    /// statuses: collection size is a 403, collection count and request
    /// rate are 429s.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum QuotaKind {
        CollectionCount,
        CollectionSize,
        RateLimit,
    }

    #[derive(Error, Debug)]
    pub enum MwsError {
        #[error("{reason}")]
        BadRequest { reason: String, detail: String },

        #[error("{reason}")]
        Unauthorized { reason: String },

        #[error("{reason}")]
        Forbidden { reason: String },

        #[error("{reason}")]
        QuotaExceeded { kind: QuotaKind, reason: String },

        #[error("Storage error: {reason}")]
        Storage { reason: String },

        #[error("Cursor not found: {reason}")]
        CursorNotFound { reason: String },

        #[error("Internal error: {reason}")]
        Internal { reason: String },
    }

    impl MwsError {
        pub fn bad_request(reason: impl Into<String>) -> Self {
            MwsError::BadRequest {
                reason: reason.into(),
                detail: String::new(),
            }
        }

        pub fn bad_request_detail(
            reason: impl Into<String>,
            detail: impl Into<String>,
        ) -> Self {
            MwsError::BadRequest {
                reason: reason.into(),
                detail: detail.into(),
            }
        }

        pub fn unauthorized(reason: impl Into<String>) -> Self {
            MwsError::Unauthorized {
                reason: reason.into(),
            }
        }

        pub fn forbidden(reason: impl Into<String>) -> Self {
            MwsError::Forbidden {
                reason: reason.into(),
            }
        }

        pub fn quota(kind: QuotaKind, reason: impl Into<String>) -> Self {
            MwsError::QuotaExceeded {
                kind,
                reason: reason.into(),
            }
        }

        pub fn storage(reason: impl Into<String>) -> Self {
            MwsError::Storage {
                reason: reason.into(),
            }
        }

        pub fn internal(reason: impl Into<String>) -> Self {
            MwsError::Internal {
                reason: reason.into(),
            }
        }

        /// HTTP status code for the error envelope.
        pub fn status(&self) -> u16 {
            match self {
                MwsError::BadRequest { .. } => 400,
                MwsError::Unauthorized { .. } => 401,
                MwsError::Forbidden { .. } => 403,
                MwsError::QuotaExceeded { kind, .. } => match kind {
                    QuotaKind::CollectionSize => 403,
                    QuotaKind::CollectionCount | QuotaKind::RateLimit => 429,
                },
                MwsError::CursorNotFound { .. } => 400,
                MwsError::Storage { .. } | MwsError::Internal { .. } => 500,
            }
        }

        /// Human-readable reason, without the detail.
        pub fn reason(&self) -> &str {
            match self {
                MwsError::BadRequest { reason, .. }
                | MwsError::Unauthorized { reason }
                | MwsError::Forbidden { reason }
                | MwsError::QuotaExceeded { reason, .. }
                | MwsError::Storage { reason }
                | MwsError::CursorNotFound { reason }
                | MwsError::Internal { reason } => reason,
            }
        }

        /// Optional extra context, empty for most errors.
        pub fn detail(&self) -> &str {
            match self {
                MwsError::BadRequest { detail, .. } => detail,
                _ => "",
            }
        }
    }

    pub type Result<T> = std::result::Result<T, MwsError>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
