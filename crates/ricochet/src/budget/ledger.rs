// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tick::Clock;

use crate::error::ERR_POISONED_LOCK;

/// A sliding-window token ledger.
///
/// The balance at any moment is the constant `reserve` plus the sum of every amount
/// recorded within the trailing `window`. Credits and debits leak out of the balance
/// once they are older than the window, which is what restores capacity after a burst.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use ricochet::budget::TokenLedger;
/// use tick::Clock;
///
/// # fn example(clock: &Clock) {
/// let ledger = TokenLedger::new(clock, Duration::from_secs(10), 2);
///
/// assert!(ledger.try_get(1));
/// assert!(ledger.try_get(1));
/// assert!(!ledger.try_get(1));
///
/// ledger.put(5);
/// assert!(ledger.try_get(3));
/// # }
/// ```
#[derive(Debug)]
pub struct TokenLedger {
    clock: Clock,
    window: Duration,
    reserve: i64,
    state: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: VecDeque<(Instant, i64)>,
    sum: i64,
}

impl LedgerState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(recorded, amount)) = self.entries.front() {
            if now.saturating_duration_since(recorded) < window {
                break;
            }

            self.sum = self.sum.saturating_sub(amount);
            self.entries.pop_front();
        }
    }

    fn record(&mut self, now: Instant, amount: i64) {
        self.sum = self.sum.saturating_add(amount);
        self.entries.push_back((now, amount));
    }
}

impl TokenLedger {
    /// Creates a ledger that sums entries over `window` on top of `reserve`.
    #[must_use]
    pub fn new(clock: impl AsRef<Clock>, window: Duration, reserve: i64) -> Self {
        Self {
            clock: clock.as_ref().clone(),
            window,
            reserve,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Records a credit of `amount` tokens.
    pub fn put(&self, amount: i64) {
        let now = self.clock.instant();
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        state.prune(now, self.window);
        state.record(now, amount);
    }

    /// Takes `amount` tokens if the balance covers them.
    ///
    /// Returns `false` and records nothing when the balance is too low.
    #[must_use]
    pub fn try_get(&self, amount: i64) -> bool {
        let now = self.clock.instant();
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        state.prune(now, self.window);

        if self.reserve.saturating_add(state.sum).saturating_sub(amount) < 0 {
            return false;
        }

        state.record(now, amount.saturating_neg());
        true
    }

    /// Returns the current balance.
    #[must_use]
    pub fn available(&self) -> i64 {
        let now = self.clock.instant();
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        state.prune(now, self.window);
        self.reserve.saturating_add(state.sum)
    }

    /// Returns the constant reserve.
    #[must_use]
    pub fn reserve(&self) -> i64 {
        self.reserve
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use tick::ClockControl;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn reserve_is_spent_then_denied() {
        let ledger = TokenLedger::new(Clock::new_frozen(), WINDOW, 3);

        assert!(ledger.try_get(1));
        assert!(ledger.try_get(2));
        assert!(!ledger.try_get(1));
        assert_eq!(ledger.available(), 0);
    }

    #[test]
    fn denied_request_records_nothing() {
        let ledger = TokenLedger::new(Clock::new_frozen(), WINDOW, 3);

        assert!(!ledger.try_get(4));
        assert_eq!(ledger.available(), 3);
        assert!(ledger.try_get(3));
    }

    #[test]
    fn credits_extend_balance() {
        let ledger = TokenLedger::new(Clock::new_frozen(), WINDOW, 0);

        assert!(!ledger.try_get(1));
        ledger.put(2);
        assert!(ledger.try_get(1));
        assert!(ledger.try_get(1));
        assert!(!ledger.try_get(1));
    }

    #[test]
    fn entries_leak_after_window() {
        let control = ClockControl::new();
        let ledger = TokenLedger::new(control.to_clock(), WINDOW, 0);

        ledger.put(5);
        control.advance(Duration::from_secs(9));
        assert_eq!(ledger.available(), 5);

        control.advance(Duration::from_secs(1));
        assert_eq!(ledger.available(), 0);
    }

    #[test]
    fn debits_leak_after_window() {
        let control = ClockControl::new();
        let ledger = TokenLedger::new(control.to_clock(), WINDOW, 2);

        assert!(ledger.try_get(2));
        assert!(!ledger.try_get(1));

        control.advance(WINDOW);
        assert!(ledger.try_get(2));
    }

    #[test]
    fn entries_age_out_independently() {
        let control = ClockControl::new();
        let ledger = TokenLedger::new(control.to_clock(), WINDOW, 0);

        ledger.put(1);
        control.advance(Duration::from_secs(5));
        ledger.put(1);
        assert_eq!(ledger.available(), 2);

        control.advance(Duration::from_secs(5));
        assert_eq!(ledger.available(), 1);

        control.advance(Duration::from_secs(5));
        assert_eq!(ledger.available(), 0);
        assert_eq!(ledger.reserve(), 0);
    }
}
