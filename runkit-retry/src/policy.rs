//! Retry budget and backoff parameters.

use runkit_primitives::{Error as InputError, ensure_in_range};
use serde::{Deserialize, Serialize};

/// Default number of attempts permitted per operation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Smallest accepted attempt budget.
pub const MIN_RETRIES: u32 = 1;
/// Largest accepted attempt budget.
pub const MAX_RETRIES_LIMIT: u32 = 10;
/// Default base delay before the first retry.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
/// Smallest accepted base delay.
pub const MIN_INITIAL_DELAY_MS: u64 = 100;
/// Largest accepted base delay.
pub const MAX_INITIAL_DELAY_MS: u64 = 60_000;

/// Attempt budget and exponential backoff settings for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_delay_ms: Option<u64>,
}

impl RetryPolicy {
    /// Creates an uncapped policy after validating both parameters.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::OutOfRange`] when `max_retries` lies outside
    /// `1..=10` or `initial_delay_ms` outside `100..=60000`.
    pub fn new(max_retries: u32, initial_delay_ms: u64) -> Result<Self, InputError> {
        ensure_in_range("maxRetries", max_retries, MIN_RETRIES, MAX_RETRIES_LIMIT)?;
        ensure_in_range(
            "initialDelayMs",
            initial_delay_ms,
            MIN_INITIAL_DELAY_MS,
            MAX_INITIAL_DELAY_MS,
        )?;
        Ok(Self {
            max_retries,
            initial_delay_ms,
            max_delay_ms: None,
        })
    }

    /// Caps every computed backoff delay at `max_delay_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::Invalid`] when the cap is below the initial delay.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Result<Self, InputError> {
        if max_delay_ms < self.initial_delay_ms {
            return Err(InputError::invalid(
                "maxDelayMs",
                format!(
                    "cannot be lower than initialDelayMs ({})",
                    self.initial_delay_ms
                ),
            ));
        }
        self.max_delay_ms = Some(max_delay_ms);
        Ok(self)
    }

    /// Returns the attempt budget.
    #[must_use]
    pub const fn max_retries(self) -> u32 {
        self.max_retries
    }

    /// Returns the base delay in milliseconds.
    #[must_use]
    pub const fn initial_delay_ms(self) -> u64 {
        self.initial_delay_ms
    }

    /// Returns the optional delay cap in milliseconds.
    #[must_use]
    pub const fn max_delay_ms(self) -> Option<u64> {
        self.max_delay_ms
    }

    /// Delay required after `attempts` prior attempts:
    /// `initial_delay_ms * 2^attempts`, saturating, then capped.
    #[must_use]
    pub fn required_delay_ms(self, attempts: u32) -> u64 {
        let uncapped = 2_u64
            .checked_pow(attempts)
            .and_then(|factor| self.initial_delay_ms.checked_mul(factor))
            .unwrap_or(u64::MAX);
        match self.max_delay_ms {
            Some(cap) => uncapped.min(cap),
            None => uncapped,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: None,
        }
    }
}
