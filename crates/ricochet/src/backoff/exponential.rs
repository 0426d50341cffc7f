// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use tick::Clock;
use tracing::Level;

use crate::telemetry::{DIRECTORY_LOST_EVENT_NAME, DIRECTORY_RESTORED_EVENT_NAME};

/// Exponential backoff for a control-plane poll, keyed on the current failure streak.
///
/// The n-th consecutive failure waits `min * 2^(n - 1)`, capped at `max`. Logging is
/// edge-triggered: the first failure of a streak logs `lost_message` at `ERROR` and the
/// first success after a streak logs `restored_message` at `INFO`; nothing is logged
/// while the state does not change.
#[derive(Debug)]
pub(crate) struct ErrorBackoff {
    clock: Clock,
    min: Duration,
    max: Duration,
    failures: u32,
    down_since: Option<Instant>,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
    lost_message: Cow<'static, str>,
    restored_message: Cow<'static, str>,
}

impl ErrorBackoff {
    pub(crate) fn new(
        clock: Clock,
        min: Duration,
        max: Duration,
        lost_message: impl Into<Cow<'static, str>>,
        restored_message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            clock,
            min,
            max,
            failures: 0,
            down_since: None,
            last_success: None,
            last_failure: None,
            lost_message: lost_message.into(),
            restored_message: restored_message.into(),
        }
    }

    /// Records a failure and returns the delay before the next try.
    pub(crate) fn failed(&mut self, error: &(dyn StdError + 'static)) -> Duration {
        let now = self.clock.instant();
        self.last_failure = Some(now);
        self.failures = self.failures.saturating_add(1);

        if self.down_since.is_none() {
            self.down_since = Some(now);

            tracing::event!(
                name: DIRECTORY_LOST_EVENT_NAME,
                Level::ERROR,
                error = error,
                "{}",
                self.lost_message,
            );
        }

        self.delay()
    }

    /// Records a success, ending the current failure streak.
    pub(crate) fn succeeded(&mut self) {
        let now = self.clock.instant();
        self.last_success = Some(now);
        self.failures = 0;

        if let Some(since) = self.down_since.take() {
            tracing::event!(
                name: DIRECTORY_RESTORED_EVENT_NAME,
                Level::INFO,
                outage.duration = now.saturating_duration_since(since).as_secs_f32(),
                "{}",
                self.restored_message,
            );
        }
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub(crate) fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    fn delay(&self) -> Duration {
        let exponent = self.failures.saturating_sub(1);
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);

        self.min.saturating_mul(factor).min(self.max)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use testing_aids::LogCapture;
    use tick::ClockControl;

    use super::*;

    fn backoff(clock: Clock) -> ErrorBackoff {
        ErrorBackoff::new(
            clock,
            Duration::from_millis(1),
            Duration::from_secs(1),
            "Cannot connect to directory",
            "Directory connect succeeded",
        )
    }

    fn io_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused")
    }

    #[test]
    fn doubles_until_capped() {
        let mut backoff = backoff(Clock::new_frozen());

        let delays: Vec<_> = (0..12).map(|_| backoff.failed(&io_error())).collect();

        assert_eq!(delays[0], Duration::from_millis(1));
        assert_eq!(delays[1], Duration::from_millis(2));
        assert_eq!(delays[2], Duration::from_millis(4));
        assert_eq!(delays[9], Duration::from_millis(512));
        assert_eq!(delays[10], Duration::from_secs(1));
        assert_eq!(delays[11], Duration::from_secs(1));
        assert_eq!(backoff.failures(), 12);
    }

    #[test]
    fn success_resets_streak() {
        let mut backoff = backoff(Clock::new_frozen());

        let _ = backoff.failed(&io_error());
        let _ = backoff.failed(&io_error());
        backoff.succeeded();

        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.failed(&io_error()), Duration::from_millis(1));
    }

    #[test]
    fn timestamps_follow_clock() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let mut backoff = backoff(clock.clone());

        assert_eq!(backoff.last_failure(), None);
        let _ = backoff.failed(&io_error());
        assert_eq!(backoff.last_failure(), Some(clock.instant()));

        control.advance(Duration::from_secs(3));
        backoff.succeeded();
        assert_eq!(backoff.last_success(), Some(clock.instant()));
    }

    #[test]
    fn logs_only_on_edges() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let mut backoff = backoff(Clock::new_frozen());

        backoff.succeeded();
        for _ in 0..5 {
            let _ = backoff.failed(&io_error());
        }
        backoff.succeeded();
        backoff.succeeded();

        let output = capture.output();
        assert_eq!(output.matches("Cannot connect to directory").count(), 1);
        assert_eq!(output.matches("Directory connect succeeded").count(), 1);
        capture.assert_contains("connection refused");
    }
}
