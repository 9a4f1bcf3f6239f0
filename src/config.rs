use crate::retry::RetryConfig;
use envconfig::Envconfig;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Log level used when RUST_LOG is unset
    #[envconfig(from = "GOVERNOR_LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Rate-limit retries before giving up
    #[envconfig(from = "GOVERNOR_RETRY_MAX_RETRIES", default = "3")]
    pub retry_max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[envconfig(from = "GOVERNOR_RETRY_BASE_DELAY_MS", default = "1000")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[envconfig(from = "GOVERNOR_RETRY_MAX_DELAY_MS", default = "30000")]
    pub retry_max_delay_ms: u64,

    #[envconfig(from = "GOVERNOR_RETRY_BACKOFF_MULTIPLIER", default = "2.0")]
    pub retry_backoff_multiplier: f64,

    #[envconfig(from = "GOVERNOR_RETRY_JITTER", default = "true")]
    pub retry_jitter: bool,

    /// Minimum gap between repeated rate-limit warnings for one endpoint
    #[envconfig(from = "GOVERNOR_NOTIFICATION_COOLDOWN_MS", default = "30000")]
    pub notification_cooldown_ms: u64,

    #[envconfig(from = "GOVERNOR_ERROR_HISTORY_CAPACITY", default = "50")]
    pub error_history_capacity: usize,

    /// Time bucket for generated cache keys
    #[envconfig(from = "GOVERNOR_CACHE_WINDOW_MS", default = "300000")]
    pub cache_window_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry_max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
            jitter: self.retry_jitter,
        }
    }

    pub fn cache_window(&self) -> Duration {
        Duration::from_millis(self.cache_window_ms)
    }
}
