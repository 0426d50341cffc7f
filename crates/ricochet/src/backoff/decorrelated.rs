// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::rnd::Rnd;

const GROWTH_FACTOR: u32 = 3;

/// Decorrelated jitter backoff.
///
/// Each delay is drawn uniformly from `[min, max(min, previous * 3))` and clamped into
/// `[min, max]`. Because the upper bound scales with the previous delay rather than with
/// the attempt number, clients that started retrying at the same moment drift apart
/// after a couple of attempts.
///
/// A server-provided delay (for example from a `Retry-After` header, surfaced through
/// [`RecoveryInfo::get_delay`][recoverable::RecoveryInfo::get_delay]) wins over the
/// drawn delay when it is longer, but never pushes the result above `max`.
///
/// References
/// - [Exponential Backoff And Jitter](https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/)
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use ricochet::backoff::DecorrelatedJitter;
///
/// let backoff = DecorrelatedJitter::new(Duration::from_millis(10), Duration::from_secs(1));
///
/// let first = backoff.backoff(None, None);
/// assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(30));
///
/// let second = backoff.backoff(Some(first), Some(Duration::from_millis(500)));
/// assert!(second >= Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct DecorrelatedJitter {
    min: Duration,
    max: Duration,
    rnd: Rnd,
}

impl DecorrelatedJitter {
    /// Creates a policy producing delays between `min` and `max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            rnd: Rnd::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    /// Computes the delay that follows `previous`.
    ///
    /// Pass `None` for the first delay of a sequence; `min` is then used as the previous value.
    #[must_use]
    pub fn backoff(&self, previous: Option<Duration>, suggested: Option<Duration>) -> Duration {
        let previous = previous.unwrap_or(self.min);
        let upper = self.min.max(previous.saturating_mul(GROWTH_FACTOR));
        let candidate = self.min.saturating_add(scale(upper.saturating_sub(self.min), self.rnd.next_f64()));

        let delay = match suggested {
            Some(suggested) if suggested > candidate => suggested,
            _ => candidate,
        };

        clamp(delay, self.min, self.max)
    }

    /// Returns the lower bound.
    #[must_use]
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Returns the upper bound.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "factor is within [0, 1] and float to int casts saturate"
)]
fn scale(span: Duration, factor: f64) -> Duration {
    let nanos = u64::try_from(span.as_nanos()).unwrap_or(u64::MAX);
    let scaled = (nanos as f64 * factor.clamp(0.0, 1.0)).round() as u64;

    Duration::from_nanos(scaled)
}

// `Duration::clamp` panics when min > max; callers validate that, but a bad value must not take the process down.
fn clamp(delay: Duration, min: Duration, max: Duration) -> Duration {
    delay.max(min).min(max)
}
