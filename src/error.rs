use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// HTTP status used by servers to signal throttling.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// A server-side throttling signal, normalized from whatever the failed
/// operation reported.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Rate limited ({status}): {message}")]
pub struct RateLimitError {
    pub status: u16,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub endpoint: Option<String>,
    pub timestamp: Instant,
}

impl RateLimitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: TOO_MANY_REQUESTS,
            message: message.into(),
            retry_after: None,
            endpoint: None,
            timestamp: Instant::now(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Failure of a governed operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error(transparent)]
    RateLimited(RateLimitError),

    #[error("Operation failed{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Failed {
        status: Option<u16>,
        message: String,
    },
}

fn rate_limit_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?i)(too many requests|rate limit)").expect("rate limit marker pattern is valid")
    })
}

/// Parse a `Retry-After` value given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

impl OperationError {
    pub fn failed(status: Option<u16>, message: impl Into<String>) -> Self {
        OperationError::Failed {
            status,
            message: message.into(),
        }
    }

    /// Normalize a response-shaped failure into an `OperationError`.
    ///
    /// Status 429, or a message carrying a "too many requests" / "rate limit"
    /// marker, is classified as a rate-limit signal.
    pub fn from_response(
        status: Option<u16>,
        message: impl Into<String>,
        retry_after_header: Option<&str>,
    ) -> Self {
        let message = message.into();
        let throttled =
            status == Some(TOO_MANY_REQUESTS) || rate_limit_marker().is_match(&message);

        if !throttled {
            return OperationError::Failed { status, message };
        }

        OperationError::RateLimited(RateLimitError {
            status: status.unwrap_or(TOO_MANY_REQUESTS),
            message,
            retry_after: retry_after_header.and_then(parse_retry_after),
            endpoint: None,
            timestamp: Instant::now(),
        })
    }

    /// Normalize a loosely shaped JSON error object.
    ///
    /// Reads `status` or `response.status`, `response.data.message` or
    /// `message`, and the retry hint from `response.headers` or `retryAfter`.
    pub fn from_json(value: &Value) -> Self {
        let status = value
            .get("status")
            .and_then(Value::as_u64)
            .or_else(|| value.pointer("/response/status").and_then(Value::as_u64))
            .and_then(|s| u16::try_from(s).ok());

        let message = value
            .pointer("/response/data/message")
            .and_then(Value::as_str)
            .or_else(|| value.get("message").and_then(Value::as_str))
            .unwrap_or("Unknown error")
            .to_string();

        let retry_after = ["/response/headers/retry-after", "/response/headers/Retry-After", "/retryAfter"]
            .iter()
            .find_map(|pointer| value.pointer(pointer))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Self::from_response(status, message, retry_after.as_deref())
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, OperationError::RateLimited(_))
    }

    pub fn as_rate_limit(&self) -> Option<&RateLimitError> {
        match self {
            OperationError::RateLimited(err) => Some(err),
            OperationError::Failed { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            OperationError::RateLimited(err) => Some(err.status),
            OperationError::Failed { status, .. } => *status,
        }
    }
}

impl From<RateLimitError> for OperationError {
    fn from(err: RateLimitError) -> Self {
        OperationError::RateLimited(err)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GovernorError {
    #[error("Request throttled: too many requests for '{key}'")]
    Throttled { key: String },

    #[error("Rate limit retries exhausted for {endpoint} after {attempts} attempts")]
    RetriesExhausted { endpoint: String, attempts: u32 },

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl GovernorError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, GovernorError::Throttled { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GovernorError::Operation(op) if op.is_rate_limit())
    }
}

impl From<validator::ValidationErrors> for GovernorError {
    fn from(err: validator::ValidationErrors) -> Self {
        GovernorError::ValidationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GovernorError>;
