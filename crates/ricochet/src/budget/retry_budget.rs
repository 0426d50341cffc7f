// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use tick::Clock;

use super::TokenLedger;
use crate::config::ClientConfig;

/// Tokens deposited by each original request when the ratio is non-zero.
const SCALE_FACTOR: f64 = 1000.0;

/// Caps retries to a fraction of the request volume plus a per-second floor.
///
/// Every original request deposits [`SCALE_FACTOR`] tokens and every retry withdraws
/// `SCALE_FACTOR / ratio` tokens, so one request funds `ratio` retries. The ledger
/// reserve funds `min_per_second` retries per second of the window even without traffic.
/// A ratio of zero turns off the traffic-based credit and makes every retry cost one
/// token of the reserve.
#[derive(Debug)]
pub struct RetryBudget {
    deposit: i64,
    withdrawal: i64,
    ledger: TokenLedger,
}

impl RetryBudget {
    /// Creates a budget.
    ///
    /// `ratio` is expected within `0..=1000` and `period` within 1 second and 1 minute.
    #[must_use]
    pub fn new(clock: impl AsRef<Clock>, ratio: f64, period: Duration, min_per_second: u32) -> Self {
        let (deposit, withdrawal) = amounts(ratio);
        let reserve = i64::from(min_per_second)
            .saturating_mul(round_to_secs(period))
            .saturating_mul(withdrawal);

        Self {
            deposit,
            withdrawal,
            ledger: TokenLedger::new(clock, period, reserve),
        }
    }

    /// Creates a budget from the retry settings of a client.
    #[must_use]
    pub fn from_config(clock: impl AsRef<Clock>, config: &ClientConfig) -> Self {
        Self::new(
            clock,
            config.get_retry_budget_ratio(),
            config.get_retry_budget_ratio_period(),
            config.get_retry_budget_min_per_second(),
        )
    }

    /// Credits the budget for an original, non-retry request.
    pub fn deposit(&self) {
        self.ledger.put(self.deposit);
    }

    /// Takes the cost of one retry from the budget, returning whether the retry may proceed.
    #[must_use]
    pub fn try_withdraw(&self) -> bool {
        self.ledger.try_get(self.withdrawal)
    }

    /// Returns the underlying ledger.
    #[must_use]
    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }
}

#[expect(clippy::cast_possible_truncation, reason = "result is within [1, SCALE_FACTOR]")]
fn amounts(ratio: f64) -> (i64, i64) {
    if ratio <= 0.0 || !ratio.is_finite() {
        return (0, 1);
    }

    let withdrawal = (SCALE_FACTOR / ratio).round().clamp(1.0, f64::from(i32::MAX)) as i64;
    (SCALE_FACTOR as i64, withdrawal)
}

fn round_to_secs(period: Duration) -> i64 {
    let secs = period.as_secs().saturating_add(u64::from(period.subsec_millis() >= 500));
    i64::try_from(secs).unwrap_or(i64::MAX)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tick::ClockControl;

    use super::*;

    #[rstest]
    #[case::zero(0.0, (0, 1))]
    #[case::fifth(0.2, (1000, 5000))]
    #[case::half(0.5, (1000, 2000))]
    #[case::one(1.0, (1000, 1000))]
    #[case::third(3.0, (1000, 333))]
    #[case::max(1000.0, (1000, 1))]
    fn scaled_amounts(#[case] ratio: f64, #[case] expected: (i64, i64)) {
        assert_eq!(amounts(ratio), expected);
    }

    #[rstest]
    #[case(Duration::from_secs(10), 10)]
    #[case(Duration::from_millis(1499), 1)]
    #[case(Duration::from_millis(1500), 2)]
    fn rounds_period(#[case] period: Duration, #[case] expected: i64) {
        assert_eq!(round_to_secs(period), expected);
    }

    #[test]
    fn fails_when_empty() {
        let budget = RetryBudget::new(Clock::new_frozen(), 0.5, Duration::from_secs(1), 1);

        assert!(budget.try_withdraw());
        assert!(!budget.try_withdraw());
    }

    #[test]
    fn provisions_reserve() {
        let budget = RetryBudget::new(Clock::new_frozen(), 0.5, Duration::from_secs(10), 3);

        for _ in 0..30 {
            assert!(budget.try_withdraw());
        }
        assert!(!budget.try_withdraw());
    }

    #[test]
    fn deposits_fund_retries() {
        let budget = RetryBudget::new(Clock::new_frozen(), 0.5, Duration::from_secs(1), 0);

        assert!(!budget.try_withdraw());

        budget.deposit();
        budget.deposit();
        assert!(budget.try_withdraw());
        assert!(!budget.try_withdraw());
    }

    #[test]
    fn zero_ratio_earns_nothing() {
        let budget = RetryBudget::new(Clock::new_frozen(), 0.0, Duration::from_secs(1), 2);

        for _ in 0..100 {
            budget.deposit();
        }

        assert!(budget.try_withdraw());
        assert!(budget.try_withdraw());
        assert!(!budget.try_withdraw());
    }

    #[test]
    fn is_leaky() {
        let control = ClockControl::new();
        let budget = RetryBudget::new(control.to_clock(), 0.1, Duration::from_secs(1), 0);

        for _ in 0..10 {
            budget.deposit();
        }
        assert!(budget.try_withdraw());

        control.advance(Duration::from_secs(1));
        assert!(!budget.try_withdraw());
    }

    #[test]
    fn from_config_uses_client_settings() {
        let config = ClientConfig::default()
            .retry_budget_ratio(1.0)
            .retry_budget_ratio_period(Duration::from_secs(2))
            .retry_budget_min_per_second(1);
        let budget = RetryBudget::from_config(Clock::new_frozen(), &config);

        assert_eq!(budget.ledger().reserve(), 2000);
    }
}
