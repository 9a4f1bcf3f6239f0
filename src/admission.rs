//! Admission control: decides whether a new call for a key may proceed.

use crate::throttle_config::ThrottleConfig;
use crate::tracker::RequestTracker;
use std::time::Duration;
use tokio::time::Instant;

/// Trailing window for the per-minute cap.
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Trailing window for the burst cap.
pub const BURST_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    /// Still inside a burst-triggered cooldown.
    Cooldown { remaining: Duration },
    /// The trailing minute already holds `max_requests_per_minute` calls.
    MinuteCapReached,
    /// The burst window is full; a cooldown starts now.
    BurstCapReached,
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed)
    }
}

/// Evaluate admission for one tracker at `now`.
///
/// Checks run in order: active cooldown, cooldown expiry, per-minute cap,
/// burst cap. Prunes timestamps older than a minute before counting. The
/// tracker is not recorded into; callers do that once admitted.
pub fn evaluate(tracker: &mut RequestTracker, config: &ThrottleConfig, now: Instant) -> AdmissionDecision {
    tracker.prune(now, MINUTE_WINDOW);

    if tracker.is_in_cooldown {
        let elapsed = now.saturating_duration_since(tracker.last_burst_time);
        if elapsed < config.cooldown {
            return AdmissionDecision::Cooldown {
                remaining: config.cooldown - elapsed,
            };
        }
        tracker.end_cooldown(now);
    }

    if tracker.timestamps.len() >= config.max_requests_per_minute as usize {
        return AdmissionDecision::MinuteCapReached;
    }

    let in_burst = tracker.count_in_burst_window(now, BURST_WINDOW);
    tracker.burst_count = in_burst as u32;
    if in_burst >= config.burst_limit as usize {
        tracker.start_cooldown(now);
        return AdmissionDecision::BurstCapReached;
    }

    AdmissionDecision::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle_config::ThrottlePreset;

    fn admit(tracker: &mut RequestTracker, config: &ThrottleConfig, now: Instant) -> AdmissionDecision {
        let decision = evaluate(tracker, config, now);
        if decision.is_allowed() {
            tracker.record(now);
        }
        decision
    }

    #[test]
    fn test_burst_cap_triggers_cooldown() {
        let config = ThrottlePreset::Analytics.config();
        let mut tracker = RequestTracker::new();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(admit(&mut tracker, &config, now).is_allowed());
        }
        assert_eq!(admit(&mut tracker, &config, now), AdmissionDecision::BurstCapReached);
        assert!(tracker.is_in_cooldown);
        assert_eq!(tracker.last_burst_time, now);

        let later = now + Duration::from_millis(1000);
        assert_eq!(
            admit(&mut tracker, &config, later),
            AdmissionDecision::Cooldown { remaining: Duration::from_millis(4000) }
        );
    }

    #[test]
    fn test_cooldown_self_expires() {
        let config = ThrottlePreset::Analytics.config();
        let mut tracker = RequestTracker::new();
        let now = Instant::now();

        for _ in 0..4 {
            admit(&mut tracker, &config, now);
        }
        assert!(tracker.is_in_cooldown);

        let after = now + config.cooldown;
        assert!(admit(&mut tracker, &config, after).is_allowed());
        assert!(!tracker.is_in_cooldown);
        assert_eq!(tracker.burst_count, 0);
    }

    #[test]
    fn test_minute_cap() {
        let config = ThrottleConfig::new(5, 100, Duration::from_secs(1), Duration::from_secs(1), 1);
        let mut tracker = RequestTracker::new();
        let start = Instant::now();

        for i in 0..5 {
            let at = start + Duration::from_secs(i * 11);
            assert!(admit(&mut tracker, &config, at).is_allowed());
        }

        let at = start + Duration::from_secs(59);
        assert_eq!(admit(&mut tracker, &config, at), AdmissionDecision::MinuteCapReached);

        // The first timestamp ages out of the minute window.
        let at = start + Duration::from_secs(60);
        assert!(admit(&mut tracker, &config, at).is_allowed());
    }

    #[test]
    fn test_lazy_cooldown_flag_persists_without_checks() {
        let config = ThrottlePreset::Realtime.config();
        let mut tracker = RequestTracker::new();
        let now = Instant::now();

        for _ in 0..3 {
            admit(&mut tracker, &config, now);
        }
        // Nothing clears the flag until the next evaluation.
        assert!(tracker.is_in_cooldown);
    }
}
