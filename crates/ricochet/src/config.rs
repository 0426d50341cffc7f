// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration values consumed by the balancer, the clients and the refresh loop.
//!
//! All values are assumed to be validated by the caller. The defaults match what a
//! service calling a handful of instances needs, so most applications only override
//! a field or two:
//!
//! ```
//! use std::time::Duration;
//!
//! use ricochet::config::ClientConfig;
//!
//! let config = ClientConfig::default()
//!     .max_attempts(5)
//!     .max_backoff(Duration::from_secs(2));
//!
//! assert_eq!(config.get_max_attempts(), 5);
//! ```

use std::borrow::Cow;
use std::time::Duration;

pub(crate) const DEFAULT_CONSECUTIVE_FAILURES: u32 = 5;
pub(crate) const DEFAULT_REMOVAL_MIN_BACKOFF: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_REMOVAL_MAX_BACKOFF: Duration = Duration::from_secs(120);

pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_RETRY_MIN_BACKOFF: Duration = Duration::from_millis(10);
pub(crate) const DEFAULT_RETRY_MAX_BACKOFF: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_RETRY_BUDGET_RATIO: f64 = 0.2;
pub(crate) const DEFAULT_RETRY_BUDGET_RATIO_PERIOD: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_RETRY_BUDGET_MIN_PER_SECOND: u32 = 10;

pub(crate) const DEFAULT_POOL: &str = "general";
pub(crate) const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_ERROR_MIN_BACKOFF: Duration = Duration::from_millis(1);
pub(crate) const DEFAULT_ERROR_MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Health tracking settings for a [`Balancer`][crate::balancer::Balancer].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BalancerConfig {
    consecutive_failures: u32,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            consecutive_failures: DEFAULT_CONSECUTIVE_FAILURES,
            min_backoff: DEFAULT_REMOVAL_MIN_BACKOFF,
            max_backoff: DEFAULT_REMOVAL_MAX_BACKOFF,
        }
    }
}

impl BalancerConfig {
    /// Number of consecutive failures after which an instance is removed from normal selection.
    ///
    /// **Default**: 5
    #[must_use]
    pub fn consecutive_failures(mut self, failures: u32) -> Self {
        self.consecutive_failures = failures;
        self
    }

    /// Smallest time a removed instance stays out of normal selection.
    ///
    /// **Default**: 5 seconds
    #[must_use]
    pub fn min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    /// Largest time a removed instance stays out of normal selection.
    ///
    /// **Default**: 2 minutes
    #[must_use]
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Returns the removal threshold.
    #[must_use]
    pub fn get_consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns the minimum removal backoff.
    #[must_use]
    pub fn get_min_backoff(&self) -> Duration {
        self.min_backoff
    }

    /// Returns the maximum removal backoff.
    #[must_use]
    pub fn get_max_backoff(&self) -> Duration {
        self.max_backoff
    }
}

/// Retry settings for a [`Client`][crate::client::Client] or
/// [`BlockingClient`][crate::client::BlockingClient].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    max_attempts: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    retry_budget_ratio: f64,
    retry_budget_ratio_period: Duration,
    retry_budget_min_per_second: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_backoff: DEFAULT_RETRY_MIN_BACKOFF,
            max_backoff: DEFAULT_RETRY_MAX_BACKOFF,
            retry_budget_ratio: DEFAULT_RETRY_BUDGET_RATIO,
            retry_budget_ratio_period: DEFAULT_RETRY_BUDGET_RATIO_PERIOD,
            retry_budget_min_per_second: DEFAULT_RETRY_BUDGET_MIN_PER_SECOND,
        }
    }
}

impl ClientConfig {
    /// Maximum number of attempts per logical call, the first attempt included.
    ///
    /// **Default**: 3
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Lower bound of the delay between attempts.
    ///
    /// **Default**: 10 milliseconds
    #[must_use]
    pub fn min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    /// Upper bound of the delay between attempts.
    ///
    /// **Default**: 10 seconds
    #[must_use]
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Retries funded by each original request, between 0 and 1000.
    ///
    /// `0.2` allows one retry for every five requests on top of the per-second floor.
    ///
    /// **Default**: 0.2
    #[must_use]
    pub fn retry_budget_ratio(mut self, ratio: f64) -> Self {
        self.retry_budget_ratio = ratio;
        self
    }

    /// Window over which deposits and withdrawals are summed, between 1 second and 1 minute.
    ///
    /// **Default**: 10 seconds
    #[must_use]
    pub fn retry_budget_ratio_period(mut self, period: Duration) -> Self {
        self.retry_budget_ratio_period = period;
        self
    }

    /// Retries per second allowed regardless of traffic.
    ///
    /// **Default**: 10
    #[must_use]
    pub fn retry_budget_min_per_second(mut self, min_per_second: u32) -> Self {
        self.retry_budget_min_per_second = min_per_second;
        self
    }

    /// Returns the maximum number of attempts.
    #[must_use]
    pub fn get_max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the minimum retry backoff.
    #[must_use]
    pub fn get_min_backoff(&self) -> Duration {
        self.min_backoff
    }

    /// Returns the maximum retry backoff.
    #[must_use]
    pub fn get_max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the retry budget ratio.
    #[must_use]
    pub fn get_retry_budget_ratio(&self) -> f64 {
        self.retry_budget_ratio
    }

    /// Returns the retry budget window.
    #[must_use]
    pub fn get_retry_budget_ratio_period(&self) -> Duration {
        self.retry_budget_ratio_period
    }

    /// Returns the retry budget floor.
    #[must_use]
    pub fn get_retry_budget_min_per_second(&self) -> u32 {
        self.retry_budget_min_per_second
    }
}

/// Polling settings for a [`RefreshLoop`][crate::directory::RefreshLoop].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RefreshConfig {
    pool: Cow<'static, str>,
    default_delay: Duration,
    initial_timeout: Duration,
    call_timeout: Duration,
    watchdog_interval: Duration,
    error_min_backoff: Duration,
    error_max_backoff: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            pool: Cow::Borrowed(DEFAULT_POOL),
            default_delay: DEFAULT_REFRESH_DELAY,
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            error_min_backoff: DEFAULT_ERROR_MIN_BACKOFF,
            error_max_backoff: DEFAULT_ERROR_MAX_BACKOFF,
        }
    }
}

impl RefreshConfig {
    /// Directory pool to look instances up in.
    ///
    /// **Default**: `general`
    #[must_use]
    pub fn pool(mut self, pool: impl Into<Cow<'static, str>>) -> Self {
        self.pool = pool.into();
        self
    }

    /// Delay before the next refresh when the directory does not provide a max-age.
    ///
    /// **Default**: 10 seconds
    #[must_use]
    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Time the initial fetch may take before startup proceeds without it.
    ///
    /// **Default**: 1 second
    #[must_use]
    pub fn initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    /// Time a single directory call may take before it counts as a failure.
    ///
    /// **Default**: 30 seconds
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Longest time between two refresh cycles, whatever the directory asked for.
    ///
    /// **Default**: 1 minute
    #[must_use]
    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Delay after the first failure of a streak.
    ///
    /// **Default**: 1 millisecond
    #[must_use]
    pub fn error_min_backoff(mut self, backoff: Duration) -> Self {
        self.error_min_backoff = backoff;
        self
    }

    /// Cap on the delay during a failure streak.
    ///
    /// **Default**: 1 second
    #[must_use]
    pub fn error_max_backoff(mut self, backoff: Duration) -> Self {
        self.error_max_backoff = backoff;
        self
    }

    /// Returns the directory pool.
    #[must_use]
    pub fn get_pool(&self) -> &str {
        &self.pool
    }

    /// Returns the refresh delay used without a max-age.
    #[must_use]
    pub fn get_default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Returns the initial fetch timeout.
    #[must_use]
    pub fn get_initial_timeout(&self) -> Duration {
        self.initial_timeout
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub fn get_call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Returns the watchdog interval.
    #[must_use]
    pub fn get_watchdog_interval(&self) -> Duration {
        self.watchdog_interval
    }

    /// Returns the minimum error backoff.
    #[must_use]
    pub fn get_error_min_backoff(&self) -> Duration {
        self.error_min_backoff
    }

    /// Returns the maximum error backoff.
    #[must_use]
    pub fn get_error_max_backoff(&self) -> Duration {
        self.error_max_backoff
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balancer_defaults() {
        let config = BalancerConfig::default();

        assert_eq!(config.get_consecutive_failures(), 5);
        assert_eq!(config.get_min_backoff(), Duration::from_secs(5));
        assert_eq!(config.get_max_backoff(), Duration::from_secs(120));
    }

    #[test]
    fn client_defaults() {
        let config = ClientConfig::default();

        assert_eq!(config.get_max_attempts(), 3);
        assert_eq!(config.get_min_backoff(), Duration::from_millis(10));
        assert_eq!(config.get_max_backoff(), Duration::from_secs(10));
        assert!((config.get_retry_budget_ratio() - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.get_retry_budget_ratio_period(), Duration::from_secs(10));
        assert_eq!(config.get_retry_budget_min_per_second(), 10);
    }

    #[test]
    fn refresh_defaults() {
        let config = RefreshConfig::default();

        assert_eq!(config.get_pool(), "general");
        assert_eq!(config.get_default_delay(), Duration::from_secs(10));
        assert_eq!(config.get_initial_timeout(), Duration::from_secs(1));
        assert_eq!(config.get_call_timeout(), Duration::from_secs(30));
        assert_eq!(config.get_watchdog_interval(), Duration::from_secs(60));
        assert_eq!(config.get_error_min_backoff(), Duration::from_millis(1));
        assert_eq!(config.get_error_max_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn setters_override() {
        let config = BalancerConfig::default()
            .consecutive_failures(2)
            .min_backoff(Duration::from_secs(1))
            .max_backoff(Duration::from_secs(3));

        assert_eq!(config.get_consecutive_failures(), 2);
        assert_eq!(config.get_min_backoff(), Duration::from_secs(1));
        assert_eq!(config.get_max_backoff(), Duration::from_secs(3));

        let config = RefreshConfig::default().pool("canary").watchdog_interval(Duration::from_secs(5));
        assert_eq!(config.get_pool(), "canary");
        assert_eq!(config.get_watchdog_interval(), Duration::from_secs(5));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialize_partial_uses_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{ "max_attempts": 7 }"#).unwrap();

        assert_eq!(config.get_max_attempts(), 7);
        assert_eq!(config.get_min_backoff(), Duration::from_millis(10));
    }
}
