// Engine configuration loaded from environment variables

/// Retry and worker configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry budget per job
    pub max_retries: u32,
    /// Base backoff; actual sleep is backoff × 2^retry_count
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_retries: 3,
            retry_backoff_ms: 1000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();

        EngineConfig {
            max_retries: std::env::var("FLOWLINE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_backoff_ms: std::env::var("FLOWLINE_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_backoff_ms),
        }
    }
}
