//! Runtime configuration
//!
//! All knobs are environment-driven with sensible defaults, loaded once at
//! startup and shared read-only through the service context.

/// Shell server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of distinct collections per tenant.
    /// `None` means unlimited; `Some(0)` means no new collections at all.
    pub quota_num_collections: Option<u64>,
    /// Per-collection byte-size quota for tenant data.
    pub quota_collection_size: u64,
    /// Requests admitted per session within one rate-limit window.
    pub ratelimit_quota: u64,
    /// Rate-limit window length in seconds.
    pub ratelimit_expiry_secs: i64,
    /// Control collection holding one record per tenant.
    pub clients_collection: String,
    /// Collection recording rate-limit access events.
    pub ratelimit_collection: String,
    /// Documents returned per find batch unless the client asks otherwise.
    pub default_batch_size: usize,
    /// Tenants idle longer than this are eligible for expiry.
    pub expire_session_duration_secs: i64,
    /// Interval between expiry sweeps, when the sweeper is enabled.
    pub expire_session_every_secs: u64,
    /// CORS origin answered on cross-domain requests.
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quota_num_collections: Some(8),
            quota_collection_size: 5 * 1024 * 1024,
            ratelimit_quota: 500,
            ratelimit_expiry_secs: 60,
            clients_collection: "clients".to_string(),
            ratelimit_collection: "server_ratelimit".to_string(),
            default_batch_size: 100,
            expire_session_duration_secs: 1800,
            expire_session_every_secs: 600,
            cors_origin: None,
        }
    }
}

impl Config {
    /// Loads configuration from `MWS_*` environment variables, falling back
    /// to the defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        // Unset means unlimited. An explicit 0 forbids new collections.
        let quota_num_collections = std::env::var("MWS_QUOTA_NUM_COLLECTIONS")
            .ok()
            .and_then(|v| v.parse().ok());

        Self {
            quota_num_collections,
            quota_collection_size: env_parse(
                "MWS_QUOTA_COLLECTION_SIZE",
                defaults.quota_collection_size,
            ),
            ratelimit_quota: env_parse("MWS_RATELIMIT_QUOTA", defaults.ratelimit_quota),
            ratelimit_expiry_secs: env_parse(
                "MWS_RATELIMIT_EXPIRY",
                defaults.ratelimit_expiry_secs,
            ),
            clients_collection: env_string(
                "MWS_CLIENTS_COLLECTION",
                &defaults.clients_collection,
            ),
            ratelimit_collection: env_string(
                "MWS_RATELIMIT_COLLECTION",
                &defaults.ratelimit_collection,
            ),
            default_batch_size: env_parse("MWS_BATCH_SIZE", defaults.default_batch_size),
            expire_session_duration_secs: env_parse(
                "MWS_EXPIRE_SESSION_DURATION",
                defaults.expire_session_duration_secs,
            ),
            expire_session_every_secs: env_parse(
                "MWS_EXPIRE_SESSION_EVERY",
                defaults.expire_session_every_secs,
            ),
            cors_origin: std::env::var("MWS_CORS_ORIGIN").ok().filter(|v| !v.is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.quota_num_collections, Some(8));
        assert_eq!(config.quota_collection_size, 5 * 1024 * 1024);
        assert_eq!(config.ratelimit_quota, 500);
        assert_eq!(config.ratelimit_expiry_secs, 60);
        assert_eq!(config.clients_collection, "clients");
        assert_eq!(config.ratelimit_collection, "server_ratelimit");
    }
}
