//! Recovery from server-side rate limiting: backoff retries, user
//! notifications and degraded fallback payloads.

use crate::config::Config;
use crate::error::{GovernorError, OperationError, RateLimitError, Result};
use crate::fallback::{endpoint_label, FallbackPayload, OperationClass};
use crate::notifier::{Notification, Notifier, Severity, TracingNotifier};
use crate::retry::RetryConfig;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const ERROR_HISTORY_CAPACITY: usize = 50;
pub const NOTIFICATION_COOLDOWN: Duration = Duration::from_secs(30);

/// Window counted as "recent" in [`RateLimitStats`].
pub const RECENT_ERROR_WINDOW: Duration = Duration::from_secs(300);

const GENERAL_NOTIFICATION_KEY: &str = "general";

/// Bounded FIFO of recorded rate-limit errors.
#[derive(Debug)]
pub struct ErrorHistory {
    entries: VecDeque<RateLimitError>,
    capacity: usize,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, error: RateLimitError) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(error);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateLimitError> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Last-notified instant per endpoint, so repeated warnings are suppressed.
#[derive(Debug)]
pub struct NotificationCooldown {
    last_notified: HashMap<String, Instant>,
    window: Duration,
}

impl NotificationCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            last_notified: HashMap::new(),
            window,
        }
    }

    /// Returns true and stamps `now` if no notification went out for
    /// `endpoint` within the window.
    pub fn try_claim(&mut self, endpoint: Option<&str>, now: Instant) -> bool {
        let key = endpoint
            .filter(|e| !e.is_empty())
            .unwrap_or(GENERAL_NOTIFICATION_KEY);

        if let Some(last) = self.last_notified.get(key) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_notified.insert(key.to_string(), now);
        true
    }
}

/// Result of a call that may have been degraded to placeholder data.
#[derive(Debug, Clone, PartialEq)]
pub enum Governed<T> {
    Fresh(T),
    Fallback(FallbackPayload),
}

impl<T> Governed<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Governed::Fallback(_))
    }

    pub fn fresh(self) -> Option<T> {
        match self {
            Governed::Fresh(value) => Some(value),
            Governed::Fallback(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub total_errors: usize,
    pub recent_errors: usize,
    pub by_endpoint: BTreeMap<String, usize>,
    #[serde(with = "humantime_serde")]
    pub last_error_age: Option<Duration>,
}

#[derive(Clone)]
pub struct RateLimitHandler {
    history: Arc<Mutex<ErrorHistory>>,
    cooldowns: Arc<Mutex<NotificationCooldown>>,
    notifier: Arc<dyn Notifier>,
}

impl Default for RateLimitHandler {
    fn default() -> Self {
        Self::new(Arc::new(TracingNotifier))
    }
}

impl RateLimitHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::with_settings(notifier, ERROR_HISTORY_CAPACITY, NOTIFICATION_COOLDOWN)
    }

    pub fn with_settings(notifier: Arc<dyn Notifier>, history_capacity: usize, notification_cooldown: Duration) -> Self {
        Self {
            history: Arc::new(Mutex::new(ErrorHistory::new(history_capacity))),
            cooldowns: Arc::new(Mutex::new(NotificationCooldown::new(notification_cooldown))),
            notifier,
        }
    }

    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_settings(
            notifier,
            config.error_history_capacity,
            Duration::from_millis(config.notification_cooldown_ms),
        )
    }

    fn lock_history(&self) -> Result<MutexGuard<'_, ErrorHistory>> {
        self.history
            .lock()
            .map_err(|_| GovernorError::InternalError("Failed to acquire lock on error history".to_string()))
    }

    /// Append a rate-limit error to the history.
    pub fn record(&self, error: &RateLimitError) -> Result<()> {
        self.lock_history()?.push(error.clone());
        Ok(())
    }

    /// Accept a failure for handling: rate-limit errors are tagged with the
    /// endpoint, recorded and announced; anything else is handed back.
    fn admit(&self, error: OperationError, endpoint: &str) -> Result<RateLimitError> {
        let rate_limit = match error {
            OperationError::RateLimited(err) => tag_endpoint(err, endpoint),
            other => return Err(other.into()),
        };

        self.record(&rate_limit)?;
        warn!(
            endpoint,
            status = rate_limit.status,
            retry_after = ?rate_limit.retry_after,
            "rate limit response received"
        );

        let claimed = self
            .cooldowns
            .lock()
            .map_err(|_| GovernorError::InternalError("Failed to acquire lock on notification cooldowns".to_string()))?
            .try_claim(Some(endpoint), Instant::now());
        if claimed {
            self.notifier.notify(Notification::new(
                Severity::Warning,
                "Too many requests",
                format!(
                    "{} is receiving too many requests. Please wait a moment.",
                    endpoint_label(endpoint)
                ),
            ));
        }

        Ok(rate_limit)
    }

    /// Retry `retry_fn` with exponential backoff after a rate-limit error.
    ///
    /// Each wait is `min(base_delay * multiplier^(attempt - 1), max_delay)`,
    /// jittered when configured and raised to the server's `Retry-After`
    /// if that is longer. Non-rate-limit failures, including `error` itself,
    /// propagate without retrying. An invalid `config` is rejected before
    /// anything is recorded.
    pub async fn handle_rate_limit_error<T, F, Fut>(
        &self,
        error: OperationError,
        endpoint: &str,
        mut retry_fn: F,
        config: &RetryConfig,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, OperationError>>,
    {
        config.check()?;
        let mut last = self.admit(error, endpoint)?;

        for attempt in 1..=config.max_retries {
            let delay = config.delay_for_attempt(attempt, last.retry_after);
            warn!(endpoint, attempt, ?delay, "retrying after rate limit");
            tokio::time::sleep(delay).await;

            match retry_fn().await {
                Ok(value) => {
                    info!(endpoint, attempt, "recovered from rate limit");
                    if attempt > 1 {
                        self.notifier.notify(Notification::new(
                            Severity::Success,
                            "Connection restored",
                            format!("{} loaded successfully.", endpoint_label(endpoint)),
                        ));
                    }
                    return Ok(value);
                }
                Err(OperationError::RateLimited(err)) => {
                    last = tag_endpoint(err, endpoint);
                    self.record(&last)?;
                }
                Err(other) => return Err(other.into()),
            }
        }

        error!(endpoint, attempts = config.max_retries, "rate limit retries exhausted");
        self.notifier.notify(Notification::new(
            Severity::Error,
            "Request failed",
            format!(
                "{} is temporarily unavailable due to rate limiting. Please try again later.",
                endpoint_label(endpoint)
            ),
        ));

        Err(GovernorError::RetriesExhausted {
            endpoint: endpoint.to_string(),
            attempts: config.max_retries,
        })
    }

    /// Degrade a rate-limit error to placeholder data for `endpoint`
    /// without retrying.
    pub fn fallback(&self, error: OperationError, endpoint: &str) -> Result<FallbackPayload> {
        self.admit(error, endpoint)?;
        Ok(OperationClass::from_endpoint(endpoint).fallback())
    }

    /// Like [`handle_rate_limit_error`](Self::handle_rate_limit_error), but
    /// exhausted retries yield a fallback payload instead of an error.
    pub async fn recover_or_fallback<T, F, Fut>(
        &self,
        error: OperationError,
        endpoint: &str,
        retry_fn: F,
        config: &RetryConfig,
    ) -> Result<Governed<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, OperationError>>,
    {
        match self.handle_rate_limit_error(error, endpoint, retry_fn, config).await {
            Ok(value) => Ok(Governed::Fresh(value)),
            Err(GovernorError::RetriesExhausted { .. }) => {
                Ok(Governed::Fallback(OperationClass::from_endpoint(endpoint).fallback()))
            }
            Err(err) => Err(err),
        }
    }

    pub fn stats(&self) -> Result<RateLimitStats> {
        let now = Instant::now();
        let history = self.lock_history()?;

        let mut by_endpoint = BTreeMap::new();
        for err in history.iter() {
            let endpoint = err.endpoint.clone().unwrap_or_else(|| GENERAL_NOTIFICATION_KEY.to_string());
            *by_endpoint.entry(endpoint).or_insert(0) += 1;
        }

        Ok(RateLimitStats {
            total_errors: history.len(),
            recent_errors: history
                .iter()
                .filter(|err| now.saturating_duration_since(err.timestamp) < RECENT_ERROR_WINDOW)
                .count(),
            by_endpoint,
            last_error_age: history
                .iter()
                .last()
                .map(|err| now.saturating_duration_since(err.timestamp)),
        })
    }

    pub fn recent_errors(&self) -> Result<Vec<RateLimitError>> {
        Ok(self.lock_history()?.iter().cloned().collect())
    }

    pub fn clear_error_history(&self) -> Result<()> {
        self.lock_history()?.clear();
        Ok(())
    }
}

fn tag_endpoint(mut error: RateLimitError, endpoint: &str) -> RateLimitError {
    if error.endpoint.is_none() {
        error.endpoint = Some(endpoint.to_string());
    }
    error
}
