//! Connection, retry and heartbeat configuration for networked backends.
//!
//! The in-memory reference backend ignores this entirely, but it is
//! carried as ambient scaffolding: any real backend built on top of this
//! crate reads the same shape from the environment instead of inventing
//! its own.

use envconfig::Envconfig;

/// Environment-derived configuration for a networked [`crate::store::EventStore`]
/// backend.
///
/// Loaded with [`Envconfig::init_from_env`]; every field has a default, so a
/// bare environment still produces a usable configuration.
#[derive(Debug, Clone, Envconfig)]
pub struct StoreConfig {
    /// Port a backend's own API (if any) listens on.
    #[envconfig(from = "API_PORT", default = "3000")]
    pub api_port: u16,

    /// Maximum number of retry attempts for a transient backend failure.
    #[envconfig(from = "MAX_RETRY_ATTEMPTS", default = "5")]
    pub max_retry_attempts: u32,

    /// Initial backoff delay before the first retry, in milliseconds.
    /// Backends are expected to back off exponentially from this value.
    #[envconfig(from = "INITIAL_RETRY_DELAY_MS", default = "1000")]
    pub initial_retry_delay_ms: u32,

    /// Socket-level timeout for a single backend operation, in
    /// milliseconds.
    #[envconfig(from = "SOCKET_TIMEOUT_MS", default = "30000")]
    pub socket_timeout_ms: u32,

    /// Interval between keep-alive heartbeats on a live subscription, in
    /// milliseconds.
    #[envconfig(from = "HEARTBEAT_INTERVAL_MS", default = "15000")]
    pub heartbeat_interval_ms: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_the_environment_is_empty() {
        let config = StoreConfig::init_from_hashmap(&std::collections::HashMap::new()).unwrap();

        assert_eq!(config.api_port, 3000);
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.initial_retry_delay_ms, 1000);
        assert_eq!(config.socket_timeout_ms, 30_000);
        assert_eq!(config.heartbeat_interval_ms, 15_000);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut env = std::collections::HashMap::new();
        env.insert("API_PORT".to_string(), "8080".to_string());
        env.insert("MAX_RETRY_ATTEMPTS".to_string(), "10".to_string());

        let config = StoreConfig::init_from_hashmap(&env).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.max_retry_attempts, 10);
        assert_eq!(config.socket_timeout_ms, 30_000);
    }
}
