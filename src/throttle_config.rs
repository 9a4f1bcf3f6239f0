use crate::error::{GovernorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Limits applied to one class of throttled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ThrottleConfig {
    #[validate(range(min = 1))]
    pub max_requests_per_minute: u32,
    #[validate(range(min = 1))]
    pub burst_limit: u32,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub cooldown: Duration,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "non_zero_duration"))]
    pub retry_delay: Duration,
    #[validate(range(min = 1))]
    pub max_retries: u32,
}

pub(crate) fn non_zero_duration(value: &Duration) -> std::result::Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

impl ThrottleConfig {
    pub fn new(
        max_requests_per_minute: u32,
        burst_limit: u32,
        cooldown: Duration,
        retry_delay: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            max_requests_per_minute,
            burst_limit,
            cooldown,
            retry_delay,
            max_retries,
        }
    }

    /// Check that every limit is greater than zero.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(GovernorError::from)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottlePreset::Dashboard.config()
    }
}

/// Named operation classes with built-in limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottlePreset {
    Analytics,
    Dashboard,
    Activities,
    Realtime,
}

impl ThrottlePreset {
    pub const ALL: [ThrottlePreset; 4] = [
        ThrottlePreset::Analytics,
        ThrottlePreset::Dashboard,
        ThrottlePreset::Activities,
        ThrottlePreset::Realtime,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ThrottlePreset::Analytics => "analytics",
            ThrottlePreset::Dashboard => "dashboard",
            ThrottlePreset::Activities => "activities",
            ThrottlePreset::Realtime => "realtime",
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        let ms = Duration::from_millis;
        match self {
            ThrottlePreset::Analytics => ThrottleConfig::new(12, 3, ms(5000), ms(2000), 3),
            ThrottlePreset::Dashboard => ThrottleConfig::new(20, 5, ms(3000), ms(1500), 3),
            ThrottlePreset::Activities => ThrottleConfig::new(60, 10, ms(1000), ms(1000), 2),
            ThrottlePreset::Realtime => ThrottleConfig::new(6, 2, ms(10000), ms(5000), 2),
        }
    }
}

impl fmt::Display for ThrottlePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ThrottlePreset {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self> {
        ThrottlePreset::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| GovernorError::ConfigurationError(format!("Unknown throttle preset '{}'", s)))
    }
}

/// Throttle limits per key, with a default for unknown keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleRules {
    pub rules: HashMap<String, ThrottleConfig>,
    pub default_rule: ThrottleConfig,
}

impl Default for ThrottleRules {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
            default_rule: ThrottleConfig::default(),
        }
    }
}

impl ThrottleRules {
    /// Rules populated with every built-in preset.
    pub fn with_presets() -> Self {
        let rules = ThrottlePreset::ALL
            .into_iter()
            .map(|preset| (preset.name().to_string(), preset.config()))
            .collect();

        Self {
            rules,
            default_rule: ThrottleConfig::default(),
        }
    }

    /// Resolve the config for a key: exact match, then the longest rule
    /// name the key starts with (`dashboard-refresh` uses `dashboard`),
    /// then the default rule.
    pub fn get_rule(&self, key: &str) -> &ThrottleConfig {
        if let Some(rule) = self.rules.get(key) {
            return rule;
        }

        self.rules
            .iter()
            .filter(|(name, _)| key.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, rule)| rule)
            .unwrap_or(&self.default_rule)
    }

    pub fn set_rule(&mut self, key: String, rule: ThrottleConfig) -> Result<()> {
        rule.check()?;
        self.rules.insert(key, rule);
        Ok(())
    }

    pub fn remove_rule(&mut self, key: &str) -> Option<ThrottleConfig> {
        self.rules.remove(key)
    }

    pub fn get_rule_keys(&self) -> Vec<&String> {
        self.rules.keys().collect()
    }
}
