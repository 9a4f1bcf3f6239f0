use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleMetrics {
    pub total_requests: u64,
    pub admitted_requests: u64,
    pub throttled_requests: u64,
    pub deduplicated_requests: u64,
    pub rate_limit_retries: u64,
    pub last_reset: u64,
}

impl Default for ThrottleMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            admitted_requests: 0,
            throttled_requests: 0,
            deduplicated_requests: 0,
            rate_limit_retries: 0,
            last_reset: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    key_metrics: Arc<RwLock<HashMap<String, ThrottleMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one admission attempt.
    pub async fn record_admission(&self, key: &str, admitted: bool) {
        let mut metrics = self.key_metrics.write().await;
        let key_metrics = metrics.entry(key.to_string()).or_default();

        key_metrics.total_requests += 1;
        if admitted {
            key_metrics.admitted_requests += 1;
        } else {
            key_metrics.throttled_requests += 1;
        }
    }

    /// Record a caller that joined an in-flight call instead of starting one.
    pub async fn record_deduplicated(&self, key: &str) {
        let mut metrics = self.key_metrics.write().await;
        metrics.entry(key.to_string()).or_default().deduplicated_requests += 1;
    }

    pub async fn record_rate_limit_retry(&self, key: &str) {
        let mut metrics = self.key_metrics.write().await;
        metrics.entry(key.to_string()).or_default().rate_limit_retries += 1;
    }

    pub async fn get_key_metrics(&self, key: &str) -> Option<ThrottleMetrics> {
        let metrics = self.key_metrics.read().await;
        metrics.get(key).cloned()
    }

    pub async fn get_all_metrics(&self) -> HashMap<String, ThrottleMetrics> {
        let metrics = self.key_metrics.read().await;
        metrics.clone()
    }

    pub async fn reset_key_metrics(&self, key: &str) {
        let mut metrics = self.key_metrics.write().await;
        if let Some(key_metrics) = metrics.get_mut(key) {
            *key_metrics = ThrottleMetrics::default();
        }
    }

    pub async fn reset_all(&self) {
        self.key_metrics.write().await.clear();
    }

    pub async fn get_global_metrics(&self) -> ThrottleMetrics {
        let metrics = self.key_metrics.read().await;
        let mut global = ThrottleMetrics::default();

        for key_metrics in metrics.values() {
            global.total_requests += key_metrics.total_requests;
            global.admitted_requests += key_metrics.admitted_requests;
            global.throttled_requests += key_metrics.throttled_requests;
            global.deduplicated_requests += key_metrics.deduplicated_requests;
            global.rate_limit_retries += key_metrics.rate_limit_retries;
        }

        global
    }
}
