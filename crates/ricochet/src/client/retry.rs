// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{Either, select};
use recoverable::{Recovery, RecoveryKind};
use tick::Clock;
use tokio::sync::watch;
use tracing::Level;

use crate::backoff::DecorrelatedJitter;
use crate::balancer::{Attempt, Balancer};
use crate::budget::RetryBudget;
use crate::config::ClientConfig;
use crate::context::Context;
use crate::telemetry::{BUDGET_EXHAUSTED, BUDGET_EXHAUSTED_EVENT_NAME, CLIENT_STRATEGY, RETRY, RETRY_EVENT_NAME, Telemetry};

pub(crate) type RetryPredicate<Req> = Arc<dyn Fn(&Req) -> bool + Send + Sync>;

/// Retry state shared by every call made through one client.
pub(crate) struct RetryCore<Req> {
    balancer: Balancer,
    budget: RetryBudget,
    backoff: DecorrelatedJitter,
    max_attempts: u32,
    clock: Clock,
    closed: watch::Sender<bool>,
    telemetry: Telemetry,
    retry_if: Option<RetryPredicate<Req>>,
}

/// What to do after an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Surrender,
    Retry(Duration),
}

/// Progress of one logical call.
#[derive(Debug)]
pub(crate) struct Call {
    pub(crate) attempt: Attempt,
    pub(crate) index: u32,
    pub(crate) last_backoff: Option<Duration>,
}

impl<Req> std::fmt::Debug for RetryCore<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCore")
            .field("balancer", &self.balancer)
            .field("budget", &self.budget)
            .field("backoff", &self.backoff)
            .field("max_attempts", &self.max_attempts)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<Req> RetryCore<Req> {
    pub(crate) fn new(context: &Context, balancer: Balancer, config: &ClientConfig, retry_if: Option<RetryPredicate<Req>>) -> Self {
        Self {
            balancer,
            budget: RetryBudget::from_config(context.clock(), config),
            backoff: DecorrelatedJitter::new(config.get_min_backoff(), config.get_max_backoff()),
            max_attempts: config.get_max_attempts().max(1),
            clock: context.clock().clone(),
            closed: watch::Sender::new(false),
            telemetry: context.create_telemetry(CLIENT_STRATEGY),
            retry_if,
        }
    }

    pub(crate) fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Starts a logical call: funds the retry budget and selects the first instance.
    pub(crate) fn begin(&self) -> Result<Call, crate::Error> {
        self.budget.deposit();

        Ok(Call {
            attempt: self.balancer.create_attempt()?,
            index: 0,
            last_backoff: None,
        })
    }

    /// Marks the current attempt bad and decides whether the call goes on.
    pub(crate) fn on_failure<E: Recovery>(&self, call: &mut Call, request: &Req, error: &E) -> Decision {
        let recovery = error.recovery();
        let category = category(recovery.kind());
        let _ = call.attempt.mark_bad(category);

        let retryable = matches!(recovery.kind(), RecoveryKind::Retry | RecoveryKind::Unavailable)
            && self.retry_if.as_ref().is_none_or(|retry_if| retry_if(request));

        if !retryable || call.index.saturating_add(1) >= self.max_attempts {
            return Decision::Surrender;
        }

        if !self.budget.try_withdraw() {
            tracing::event!(
                name: BUDGET_EXHAUSTED_EVENT_NAME,
                Level::WARN,
                client.name = %self.telemetry.name,
                attempt.index = call.index,
            );
            self.telemetry.report(BUDGET_EXHAUSTED);

            return Decision::Surrender;
        }

        let delay = self.backoff.backoff(call.last_backoff, recovery.get_delay());

        tracing::event!(
            name: RETRY_EVENT_NAME,
            Level::WARN,
            client.name = %self.telemetry.name,
            attempt.index = call.index,
            instance.endpoint = %call.attempt.endpoint(),
            failure.category = category,
            retry.delay = delay.as_secs_f32(),
        );
        self.telemetry.report(RETRY);

        Decision::Retry(delay)
    }

    /// Moves the call to its next attempt after the retry delay elapsed.
    pub(crate) fn advance(call: Call, delay: Duration) -> Result<Call, crate::Error> {
        Ok(Call {
            attempt: call.attempt.next()?,
            index: call.index.saturating_add(1),
            last_backoff: Some(delay),
        })
    }

    /// Waits for `delay`, returning `false` if the client was closed first.
    pub(crate) async fn wait(&self, delay: Duration) -> bool {
        let mut closed = self.closed.subscribe();
        let shutdown = pin!(closed.wait_for(|closed| *closed));
        let elapsed = pin!(self.clock.delay(delay));

        matches!(select(elapsed, shutdown).await, Either::Left(_))
    }
}

fn category(kind: RecoveryKind) -> &'static str {
    match kind {
        RecoveryKind::Retry => "retry",
        RecoveryKind::Unavailable => "unavailable",
        RecoveryKind::Never => "never",
        _ => "unknown",
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use http::Uri;
    use recoverable::RecoveryInfo;
    use testing_aids::{LogCapture, MetricTester};
    use tick::ClockControl;

    use super::*;
    use crate::config::BalancerConfig;
    use crate::telemetry::{EVENT_NAME, STRATEGY_NAME};

    #[derive(Debug)]
    struct Failure(RecoveryInfo);

    impl Recovery for Failure {
        fn recovery(&self) -> RecoveryInfo {
            self.0.clone()
        }
    }

    fn core(context: &Context, config: &ClientConfig, retry_if: Option<RetryPredicate<u32>>) -> RetryCore<u32> {
        let balancer = Balancer::new(context, &BalancerConfig::default());
        balancer.update([Uri::from_static("http://a/"), Uri::from_static("http://b/")]);

        RetryCore::new(context, balancer, config, retry_if)
    }

    fn retryable() -> Failure {
        Failure(RecoveryInfo::retry())
    }

    #[test]
    fn retries_retryable_failure() {
        let context = Context::new(Clock::new_frozen());
        let core = core(&context, &ClientConfig::default(), None);

        let mut call = core.begin().unwrap();
        let decision = core.on_failure(&mut call, &1, &retryable());

        assert!(matches!(decision, Decision::Retry(delay) if delay >= Duration::from_millis(10)));
    }

    #[test]
    fn unavailable_is_retryable() {
        let context = Context::new(Clock::new_frozen());
        let core = core(&context, &ClientConfig::default(), None);

        let mut call = core.begin().unwrap();
        let decision = core.on_failure(&mut call, &1, &Failure(RecoveryInfo::unavailable()));

        assert_ne!(decision, Decision::Surrender);
    }

    #[test]
    fn never_and_unknown_surrender() {
        let context = Context::new(Clock::new_frozen());
        let core = core(&context, &ClientConfig::default(), None);

        let mut call = core.begin().unwrap();
        assert_eq!(core.on_failure(&mut call, &1, &Failure(RecoveryInfo::never())), Decision::Surrender);

        let mut call = core.begin().unwrap();
        assert_eq!(core.on_failure(&mut call, &1, &Failure(RecoveryInfo::unknown())), Decision::Surrender);
    }

    #[test]
    fn predicate_vetoes_retry() {
        let context = Context::new(Clock::new_frozen());
        let core = core(&context, &ClientConfig::default(), Some(Arc::new(|request: &u32| *request % 2 == 0)));

        let mut call = core.begin().unwrap();
        assert_eq!(core.on_failure(&mut call, &1, &retryable()), Decision::Surrender);

        let mut call = core.begin().unwrap();
        assert_ne!(core.on_failure(&mut call, &2, &retryable()), Decision::Surrender);
    }

    #[test]
    fn last_attempt_does_not_spend_budget() {
        let context = Context::new(Clock::new_frozen());
        let config = ClientConfig::default()
            .max_attempts(1)
            .retry_budget_ratio(0.0)
            .retry_budget_min_per_second(1);
        let core = core(&context, &config, None);
        let before = core.budget().ledger().available();

        let mut call = core.begin().unwrap();
        assert_eq!(core.on_failure(&mut call, &1, &retryable()), Decision::Surrender);

        assert_eq!(core.budget().ledger().available(), before);
    }

    #[test]
    fn exhausted_budget_surrenders_and_reports() {
        let tester = MetricTester::new();
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let context = Context::new(Clock::new_frozen()).name("orders").enable_metrics(tester.meter_provider());
        let config = ClientConfig::default()
            .retry_budget_ratio(0.0)
            .retry_budget_min_per_second(0);
        let core = core(&context, &config, None);

        let mut call = core.begin().unwrap();
        assert_eq!(core.on_failure(&mut call, &1, &retryable()), Decision::Surrender);

        capture.assert_contains(BUDGET_EXHAUSTED_EVENT_NAME);
        capture.assert_contains("client.name=orders");
        tester.assert_attributes_contain(&[
            opentelemetry::KeyValue::new(STRATEGY_NAME, "client"),
            opentelemetry::KeyValue::new(EVENT_NAME, "budget_exhausted"),
        ]);
    }

    #[test]
    fn retry_is_logged_with_category() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let context = Context::new(Clock::new_frozen()).name("orders");
        let core = core(&context, &ClientConfig::default(), None);

        let mut call = core.begin().unwrap();
        let _ = core.on_failure(&mut call, &1, &retryable());

        capture.assert_contains(RETRY_EVENT_NAME);
        capture.assert_contains("failure.category=\"retry\"");
        capture.assert_contains("attempt.index=0");
    }

    #[test]
    fn suggested_delay_is_honored() {
        let context = Context::new(Clock::new_frozen());
        let core = core(&context, &ClientConfig::default(), None);

        let mut call = core.begin().unwrap();
        let failure = Failure(RecoveryInfo::retry().delay(Duration::from_secs(2)));

        assert_eq!(core.on_failure(&mut call, &1, &failure), Decision::Retry(Duration::from_secs(2)));
    }

    #[test]
    fn advance_moves_to_other_instance() {
        let context = Context::new(Clock::new_frozen());
        let core = core(&context, &ClientConfig::default(), None);

        let mut call = core.begin().unwrap();
        let first = call.attempt.endpoint().clone();
        let Decision::Retry(delay) = core.on_failure(&mut call, &1, &retryable()) else {
            panic!("expected a retry");
        };

        let call = RetryCore::<u32>::advance(call, delay).unwrap();

        assert_ne!(call.attempt.endpoint(), &first);
        assert_eq!(call.index, 1);
        assert_eq!(call.last_backoff, Some(delay));
    }

    #[test]
    fn wait_elapses() {
        let control = ClockControl::new().auto_advance_timers(true);
        let core = core(&Context::new(control.to_clock()), &ClientConfig::default(), None);

        assert!(futures::executor::block_on(core.wait(Duration::from_secs(5))));
    }

    #[test]
    fn wait_ends_on_close() {
        let core = core(&Context::new(Clock::new_frozen()), &ClientConfig::default(), None);
        core.close();

        assert!(core.is_closed());
        assert!(!futures::executor::block_on(core.wait(Duration::from_secs(5))));
    }
}
