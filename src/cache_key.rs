//! Time-bucketed cache keys for memoizing governed calls.

use crate::error::{GovernorError, Result};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Build `endpoint_<params>_<bucket>` where `params` is serialized with
/// object keys sorted at every depth and `bucket` is the current time in
/// milliseconds floored to a multiple of `window`.
pub fn generate_smart_cache_key(endpoint: &str, params: &Value, window: Duration) -> Result<String> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| GovernorError::InternalError(format!("System clock before epoch: {}", e)))?
        .as_millis() as u64;
    generate_smart_cache_key_at(endpoint, params, window, now_ms)
}

/// [`generate_smart_cache_key`] at an explicit time in epoch milliseconds.
pub fn generate_smart_cache_key_at(endpoint: &str, params: &Value, window: Duration, now_ms: u64) -> Result<String> {
    let window_ms = window.as_millis() as u64;
    if window_ms == 0 {
        return Err(GovernorError::ValidationError(
            "Cache window must be at least one millisecond".to_string(),
        ));
    }

    let bucket = (now_ms / window_ms) * window_ms;
    let params = serde_json::to_string(&canonicalize(params))
        .map_err(|e| GovernorError::InternalError(format!("Failed to serialize cache params: {}", e)))?;

    Ok(format!("{}_{}_{}", endpoint, params, bucket))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
