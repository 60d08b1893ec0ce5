//! Manager configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Order in which eligible resolvers are visited during assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssigningStrategy {
    /// Highest priority first, then highest suitability, then registration order
    #[default]
    PriorityBased,
    /// Registration order only
    FirstComeFirstServe,
}

/// Retry queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Reassignment attempts before the request escalates to the player
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ticks: u64,
    /// Backoff ceiling
    pub max_delay_ticks: u64,
    /// The queue is processed on ticks divisible by this
    pub tick_rate: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ticks: 20,
            max_delay_ticks: 400,
            tick_rate: 20,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `attempt` completed attempts.
    ///
    /// Doubles per attempt and saturates at `max_delay_ticks`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ticks
            .saturating_mul(factor)
            .min(self.max_delay_ticks)
    }
}

/// Configuration for a [`RequestManager`](crate::manager::RequestManager).
///
/// # Example
///
/// ```
/// use colony_requests::config::{AssigningStrategy, ManagerConfig};
///
/// let config = ManagerConfig::from_json(r#"{ "seed": 7, "retry": { "max_attempts": 5 } }"#).unwrap();
/// assert_eq!(config.seed, 7);
/// assert_eq!(config.retry.max_attempts, 5);
/// assert_eq!(config.retry.tick_rate, 20);
/// assert_eq!(config.assigning_strategy, AssigningStrategy::PriorityBased);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Seed for token minting
    pub seed: u64,
    /// Resolver visiting order
    pub assigning_strategy: AssigningStrategy,
    /// Ticks between re-evaluations of parked requests (0 disables)
    pub reassess_interval_ticks: u64,
    /// Retry queue settings
    pub retry: RetryConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            assigning_strategy: AssigningStrategy::PriorityBased,
            reassess_interval_ticks: 100,
            retry: RetryConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a default config with the given seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON config. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::InvalidValue`] for values rejected by
    /// [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.tick_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.tick_rate",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.base_delay_ticks > self.retry.max_delay_ticks {
            return Err(ConfigError::InvalidValue {
                field: "retry.base_delay_ticks",
                reason: format!(
                    "{} exceeds max_delay_ticks {}",
                    self.retry.base_delay_ticks, self.retry.max_delay_ticks
                ),
            });
        }
        Ok(())
    }
}
