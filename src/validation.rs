use crate::error::{GovernorError, Result};

/// Longest throttle key accepted.
pub const MAX_KEY_LEN: usize = 128;

/// Throttle key validation
pub struct RequestValidator;

impl RequestValidator {
    /// Validates a throttle key: any non-blank string up to `MAX_KEY_LEN` bytes.
    pub fn validate_key(key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(GovernorError::ValidationError(
                "Throttle key cannot be empty".to_string(),
            ));
        }

        if key.len() > MAX_KEY_LEN {
            return Err(GovernorError::ValidationError(format!(
                "Throttle key exceeds {} bytes",
                MAX_KEY_LEN
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(RequestValidator::validate_key("analytics").is_ok());
        assert!(RequestValidator::validate_key("dashboard-refresh").is_ok());
        assert!(RequestValidator::validate_key("/teachers/42/activities").is_ok());
        assert!(RequestValidator::validate_key("dashboard refresh").is_ok());
        assert!(RequestValidator::validate_key("/teachers/42/activities?page=2").is_ok());
        assert!(RequestValidator::validate_key("café").is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(RequestValidator::validate_key("").is_err());
        assert!(RequestValidator::validate_key("   ").is_err());
        assert!(RequestValidator::validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
