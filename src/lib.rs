pub mod admission;
pub mod cache_key;
pub mod config;
pub mod error;
pub mod fallback;
pub mod metrics;
pub mod notifier;
pub mod rate_limit_handler;
pub mod retry;
pub mod throttle_config;
pub mod throttler;
pub mod tracker;
pub mod validation;

pub use cache_key::generate_smart_cache_key;
pub use config::Config;
pub use error::{GovernorError, OperationError, RateLimitError, Result};
pub use fallback::{FallbackPayload, OperationClass};
pub use notifier::{Notification, Notifier, Severity, TracingNotifier};
pub use rate_limit_handler::{Governed, RateLimitHandler};
pub use retry::RetryConfig;
pub use throttle_config::{ThrottleConfig, ThrottlePreset, ThrottleRules};
pub use throttler::Throttler;
