use crate::admission::AdmissionDecision;
use crate::error::{GovernorError, OperationError, Result};
use crate::metrics::MetricsCollector;
use crate::retry::doubling_delay;
use crate::throttle_config::{ThrottleConfig, ThrottleRules};
use crate::tracker::{ThrottleStatus, TrackerStore};
use crate::validation::RequestValidator;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

type SharedCall<T> = Shared<BoxFuture<'static, Result<T>>>;

/// In-flight call for a key. `call` holds a `SharedCall<T>` for the
/// caller's `T`; `id` guards removal against a newer entry for the key.
struct PendingCall {
    id: Uuid,
    call: Box<dyn Any + Send + Sync>,
}

/// Client-side request governor: per-key admission control, deduplication
/// of concurrent calls and backoff on server rate-limit signals.
#[derive(Clone)]
pub struct Throttler {
    trackers: TrackerStore,
    rules: Arc<RwLock<ThrottleRules>>,
    pending: Arc<Mutex<HashMap<String, PendingCall>>>,
    metrics: MetricsCollector,
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new(ThrottleRules::with_presets())
    }
}

impl Throttler {
    pub fn new(rules: ThrottleRules) -> Self {
        Self {
            trackers: TrackerStore::new(),
            rules: Arc::new(RwLock::new(rules)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            metrics: MetricsCollector::new(),
        }
    }

    /// Run `operation` under the limits configured for `key`.
    pub async fn throttle<T, F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, OperationError>> + Send + 'static,
    {
        let config = *self.rules.read().await.get_rule(key);
        self.throttle_request(key, operation, config).await
    }

    /// Run `operation` under `config`.
    ///
    /// Callers arriving while a call for the same key is in flight join it
    /// and receive its outcome instead of invoking `operation`. Denied
    /// admissions wait `retry_delay` and try again; a rate-limited failure
    /// is retried after `retry_delay * 2^(attempt - 1)`. Both share one
    /// attempt budget of `max_retries`. Other failures propagate unchanged.
    pub async fn throttle_request<T, F, Fut>(&self, key: &str, operation: F, config: ThrottleConfig) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, OperationError>> + Send + 'static,
    {
        RequestValidator::validate_key(key)?;
        config.check()?;

        let (call, joined) = self.join_or_start(key, operation, config)?;
        if joined {
            debug!(key, "joining in-flight request");
            self.metrics.record_deduplicated(key).await;
        }
        call.await
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, HashMap<String, PendingCall>>> {
        self.pending
            .lock()
            .map_err(|_| GovernorError::InternalError("Failed to acquire lock on pending requests".to_string()))
    }

    fn join_or_start<T, F, Fut>(&self, key: &str, operation: F, config: ThrottleConfig) -> Result<(SharedCall<T>, bool)>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, OperationError>> + Send + 'static,
    {
        let mut pending = self.lock_pending()?;

        if let Some(entry) = pending.get(key) {
            if let Some(call) = entry.call.downcast_ref::<SharedCall<T>>() {
                return Ok((call.clone(), true));
            }
            // A call with a different result type holds the key; run
            // alongside it without registering.
            warn!(key, "in-flight request for key has a different result type, not joining");
            let call = self.governed_call(key, operation, config, None);
            return Ok((call, false));
        }

        let id = Uuid::new_v4();
        let call = self.governed_call(key, operation, config, Some(id));
        pending.insert(
            key.to_string(),
            PendingCall {
                id,
                call: Box::new(call.clone()),
            },
        );
        Ok((call, false))
    }

    fn governed_call<T, F, Fut>(&self, key: &str, operation: F, config: ThrottleConfig, id: Option<Uuid>) -> SharedCall<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, OperationError>> + Send + 'static,
    {
        let throttler = self.clone();
        let key = key.to_string();
        async move {
            let outcome = throttler.run_governed(&key, operation, config).await;
            if let Some(id) = id {
                throttler.finish_pending(&key, id);
            }
            outcome
        }
        .boxed()
        .shared()
    }

    fn finish_pending(&self, key: &str, id: Uuid) {
        match self.pending.lock() {
            Ok(mut pending) => {
                if pending.get(key).is_some_and(|entry| entry.id == id) {
                    pending.remove(key);
                }
            }
            Err(_) => warn!(key, "pending request registry lock poisoned"),
        }
    }

    async fn run_governed<T, F, Fut>(&self, key: &str, mut operation: F, config: ThrottleConfig) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, OperationError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let decision = self.trackers.try_acquire(key, &config)?;
            self.metrics.record_admission(key, decision.is_allowed()).await;

            if decision != AdmissionDecision::Allowed {
                if attempt >= config.max_retries {
                    warn!(key, attempts = attempt, "request throttled, giving up");
                    return Err(GovernorError::Throttled { key: key.to_string() });
                }
                attempt += 1;
                warn!(key, ?decision, attempt, delay = ?config.retry_delay, "request throttled, waiting");
                tokio::time::sleep(config.retry_delay).await;
                continue;
            }

            debug!(key, attempt, "request admitted");
            match operation().await {
                Ok(value) => return Ok(value),
                Err(OperationError::RateLimited(err)) if attempt < config.max_retries => {
                    attempt += 1;
                    let delay = doubling_delay(config.retry_delay, attempt);
                    warn!(key, attempt, ?delay, status = err.status, "rate limited by server, backing off");
                    self.metrics.record_rate_limit_retry(key).await;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Admission check for `key` without recording a request.
    pub fn is_allowed(&self, key: &str, config: &ThrottleConfig) -> Result<bool> {
        self.trackers.is_allowed(key, config)
    }

    pub async fn status(&self, key: &str) -> Result<ThrottleStatus> {
        let config = *self.rules.read().await.get_rule(key);
        self.trackers.status(key, &config)
    }

    pub fn status_with(&self, key: &str, config: &ThrottleConfig) -> Result<ThrottleStatus> {
        self.trackers.status(key, config)
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.lock_pending()?.len())
    }

    pub fn trackers(&self) -> &TrackerStore {
        &self.trackers
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Forget all request history. In-flight calls are left to finish.
    pub fn clear_throttle_data(&self) -> Result<()> {
        self.trackers.clear()
    }

    pub fn clear_key(&self, key: &str) -> Result<()> {
        self.trackers.remove(key)
    }

    pub async fn set_rule(&self, key: String, rule: ThrottleConfig) -> Result<()> {
        self.rules.write().await.set_rule(key, rule)
    }

    pub async fn remove_rule(&self, key: &str) -> Option<ThrottleConfig> {
        self.rules.write().await.remove_rule(key)
    }

    pub async fn get_rule(&self, key: &str) -> ThrottleConfig {
        *self.rules.read().await.get_rule(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateLimitError;
    use crate::throttle_config::ThrottlePreset;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn counting_op(
        calls: Arc<AtomicU32>,
        fail_first: u32,
    ) -> impl FnMut() -> BoxFuture<'static, std::result::Result<u32, OperationError>> + Send + 'static {
        move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_first {
                    Err(RateLimitError::new("Too many requests").into())
                } else {
                    Ok(n)
                }
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_call_records_timestamp() {
        let throttler = Throttler::default();
        let calls = Arc::new(AtomicU32::new(0));

        let value = throttler.throttle("analytics", counting_op(calls.clone(), 0)).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(throttler.trackers().get_or_create("analytics").unwrap().timestamps.len(), 1);
        assert_eq!(throttler.pending_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_call_waits_for_cooldown() {
        let throttler = Throttler::default();
        let config = ThrottlePreset::Analytics.config();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        for _ in 0..3 {
            throttler.throttle_request("k", counting_op(calls.clone(), 0), config).await.unwrap();
        }
        // Fourth call trips the burst cap, then waits out the 5s cooldown
        // in 2s steps.
        throttler.throttle_request("k", counting_op(calls.clone(), 0), config).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let metrics = throttler.metrics().get_key_metrics("k").await.unwrap();
        assert_eq!(metrics.throttled_requests, 3);
        assert_eq!(metrics.admitted_requests, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_error_after_max_retries() {
        let throttler = Throttler::default();
        let config = ThrottleConfig::new(12, 1, Duration::from_secs(30), Duration::from_secs(1), 2);
        let calls = Arc::new(AtomicU32::new(0));

        throttler.throttle_request("slow", counting_op(calls.clone(), 0), config).await.unwrap();
        let err = throttler
            .throttle_request("slow", counting_op(calls.clone(), 0), config)
            .await
            .unwrap_err();
        assert_eq!(err, GovernorError::Throttled { key: "slow".to_string() });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_operation_backs_off() {
        let throttler = Throttler::default();
        let config = ThrottlePreset::Dashboard.config();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let value = throttler
            .throttle_request("dashboard", counting_op(calls.clone(), 2), config)
            .await
            .unwrap();
        assert_eq!(value, 3);
        // 1.5s then 3s
        assert_eq!(start.elapsed(), Duration::from_millis(4500));
        assert_eq!(
            throttler.metrics().get_key_metrics("dashboard").await.unwrap().rate_limit_retries,
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_propagate_unchanged() {
        let throttler = Throttler::default();
        let calls = Arc::new(AtomicU32::new(0));
        let op_calls = calls.clone();

        let err = throttler
            .throttle("courses", move || {
                op_calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(OperationError::failed(Some(500), "boom")) }
            })
            .await
            .unwrap_err();

        assert_eq!(err, GovernorError::Operation(OperationError::failed(Some(500), "boom")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(throttler.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blank_key_rejected() {
        let throttler = Throttler::default();
        let err = throttler
            .throttle("  ", || async { Ok::<_, OperationError>(1u32) })
            .await
            .unwrap_err();
        assert!(matches!(err, GovernorError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_free_form_keys_accepted() {
        let throttler = Throttler::default();
        for key in ["dashboard refresh", "/teachers/42/activities?page=2", "café"] {
            let value = throttler
                .throttle(key, || async { Ok::<_, OperationError>(1u32) })
                .await
                .unwrap();
            assert_eq!(value, 1, "key {:?}", key);
        }
    }

    #[test]
    fn test_pending_count_reports_poisoned_lock() {
        let throttler = Throttler::default();
        let pending = throttler.pending.clone();
        let _ = std::thread::spawn(move || {
            let _guard = pending.lock().unwrap();
            panic!("poison pending registry");
        })
        .join();

        assert!(matches!(throttler.pending_count(), Err(GovernorError::InternalError(_))));
    }

    #[tokio::test]
    async fn test_clear_throttle_data() {
        let throttler = Throttler::default();
        throttler.throttle("analytics", || async { Ok::<_, OperationError>(1u32) }).await.unwrap();
        throttler.clear_throttle_data().unwrap();
        assert!(throttler.trackers().is_empty().unwrap());
    }
}
