use crate::admission::{self, AdmissionDecision, BURST_WINDOW, MINUTE_WINDOW};
use crate::error::{GovernorError, Result};
use crate::throttle_config::ThrottleConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window request history for one key.
#[derive(Debug, Clone)]
pub struct RequestTracker {
    pub timestamps: VecDeque<Instant>,
    pub last_burst_time: Instant,
    pub burst_count: u32,
    pub is_in_cooldown: bool,
    /// Requests before this instant no longer count toward the burst cap.
    burst_floor: Option<Instant>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
            last_burst_time: Instant::now(),
            burst_count: 0,
            is_in_cooldown: false,
            burst_floor: None,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    /// Drop timestamps that are `window` or more old.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    pub fn count_in_burst_window(&self, now: Instant, window: Duration) -> usize {
        self.timestamps
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < window)
            .filter(|&&t| self.burst_floor.map_or(true, |floor| t >= floor))
            .count()
    }

    pub(crate) fn start_cooldown(&mut self, now: Instant) {
        self.is_in_cooldown = true;
        self.last_burst_time = now;
    }

    pub(crate) fn end_cooldown(&mut self, now: Instant) {
        self.is_in_cooldown = false;
        self.burst_count = 0;
        self.burst_floor = Some(now);
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a key's throttle state.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ThrottleStatus {
    pub key: String,
    pub requests_last_minute: usize,
    pub requests_in_burst_window: usize,
    pub remaining_this_minute: u32,
    pub in_cooldown: bool,
    #[serde(with = "humantime_serde")]
    pub cooldown_remaining: Option<Duration>,
}

/// Per-key trackers, created lazily on first use.
#[derive(Clone, Default)]
pub struct TrackerStore {
    trackers: Arc<Mutex<HashMap<String, RequestTracker>>>,
}

impl TrackerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, RequestTracker>>> {
        self.trackers
            .lock()
            .map_err(|_| GovernorError::InternalError("Failed to acquire lock on trackers".to_string()))
    }

    /// Snapshot of the tracker for `key`, creating a zeroed one if absent.
    pub fn get_or_create(&self, key: &str) -> Result<RequestTracker> {
        let mut trackers = self.lock()?;
        Ok(trackers.entry(key.to_string()).or_default().clone())
    }

    /// Run admission for `key` without recording a request.
    pub fn is_allowed(&self, key: &str, config: &ThrottleConfig) -> Result<bool> {
        let mut trackers = self.lock()?;
        let tracker = trackers.entry(key.to_string()).or_default();
        Ok(admission::evaluate(tracker, config, Instant::now()).is_allowed())
    }

    /// Record a request for `key` at the current instant.
    pub fn record(&self, key: &str) -> Result<()> {
        let mut trackers = self.lock()?;
        trackers.entry(key.to_string()).or_default().record(Instant::now());
        Ok(())
    }

    /// Run admission and, when allowed, record the request under the same lock.
    pub fn try_acquire(&self, key: &str, config: &ThrottleConfig) -> Result<AdmissionDecision> {
        let now = Instant::now();
        let mut trackers = self.lock()?;
        let tracker = trackers.entry(key.to_string()).or_default();

        let decision = admission::evaluate(tracker, config, now);
        if decision.is_allowed() {
            tracker.record(now);
        }
        Ok(decision)
    }

    pub fn status(&self, key: &str, config: &ThrottleConfig) -> Result<ThrottleStatus> {
        let now = Instant::now();
        let mut trackers = self.lock()?;
        let tracker = trackers.entry(key.to_string()).or_default();
        tracker.prune(now, MINUTE_WINDOW);

        let cooldown_remaining = if tracker.is_in_cooldown {
            config
                .cooldown
                .checked_sub(now.saturating_duration_since(tracker.last_burst_time))
                .filter(|remaining| !remaining.is_zero())
        } else {
            None
        };

        let requests_last_minute = tracker.timestamps.len();
        Ok(ThrottleStatus {
            key: key.to_string(),
            requests_last_minute,
            requests_in_burst_window: tracker.count_in_burst_window(now, BURST_WINDOW),
            remaining_this_minute: config
                .max_requests_per_minute
                .saturating_sub(requests_last_minute as u32),
            in_cooldown: cooldown_remaining.is_some(),
            cooldown_remaining,
        })
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle_config::ThrottlePreset;

    #[test]
    fn test_get_or_create_is_zeroed() {
        let store = TrackerStore::new();
        let tracker = store.get_or_create("fresh").unwrap();
        assert!(tracker.timestamps.is_empty());
        assert_eq!(tracker.burst_count, 0);
        assert!(!tracker.is_in_cooldown);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_prune_removes_old_entries() {
        let start = Instant::now();
        let mut tracker = RequestTracker::new();
        tracker.record(start);
        tracker.record(start + Duration::from_secs(30));

        tracker.prune(start + Duration::from_secs(60), MINUTE_WINDOW);
        assert_eq!(tracker.timestamps.len(), 1);
    }

    #[test]
    fn test_is_allowed_does_not_record() {
        let store = TrackerStore::new();
        let config = ThrottlePreset::Analytics.config();
        assert!(store.is_allowed("k", &config).unwrap());
        assert!(store.get_or_create("k").unwrap().timestamps.is_empty());

        store.record("k").unwrap();
        assert_eq!(store.get_or_create("k").unwrap().timestamps.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_cooldown() {
        let store = TrackerStore::new();
        let config = ThrottlePreset::Realtime.config();

        for _ in 0..3 {
            store.try_acquire("live", &config).unwrap();
        }

        let status = store.status("live", &config).unwrap();
        assert_eq!(status.requests_last_minute, 2);
        assert_eq!(status.remaining_this_minute, 4);
        assert!(status.in_cooldown);
        assert_eq!(status.cooldown_remaining, Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(10)).await;
        let status = store.status("live", &config).unwrap();
        assert!(!status.in_cooldown);
    }

    #[test]
    fn test_clear() {
        let store = TrackerStore::new();
        store.record("a").unwrap();
        store.record("b").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.len().unwrap(), 1);
        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }
}
