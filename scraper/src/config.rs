use crate::error::ScraperError;
use std::time::Duration;

/// Tuning knobs for the scraper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperConfig {
    /// Time for one full pass over the active pool
    pub query_interval: Duration,
    /// Consecutive failures tolerated before an address is flagged
    pub max_failed: u32,
    /// Deadline for a single probe, independent of the interval
    pub query_timeout: Duration,
    /// Degraded addresses are probed this many times less often
    pub degraded_factor: u32,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            query_interval: Duration::from_secs(60),
            max_failed: 10,
            query_timeout: Duration::from_secs(10),
            degraded_factor: 10,
        }
    }
}

impl ScraperConfig {
    pub fn validate(&self) -> Result<(), ScraperError> {
        if self.query_interval.is_zero() || self.query_timeout.is_zero() {
            return Err(ScraperError::InvalidInterval);
        }
        self.degraded_interval().map(|_| ())
    }

    /// Interval of the slow pool
    pub fn degraded_interval(&self) -> Result<Duration, ScraperError> {
        if self.degraded_factor == 0 {
            return Err(ScraperError::InvalidInterval);
        }
        self.query_interval
            .checked_mul(self.degraded_factor)
            .ok_or(ScraperError::IntervalOverflow {
                factor: self.degraded_factor,
                interval_secs: self.query_interval.as_secs(),
            })
    }
}
