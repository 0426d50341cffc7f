// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! # Telemetry
//!
//! Well-known names used when emitting telemetry from the balancer and the clients.
//!
//! Every notable state change is emitted as a structured [`tracing`] event with a stable
//! `name:` (see the `*_EVENT_NAME` constants). When the `metrics` feature is enabled and
//! [`Context::enable_metrics`][crate::Context::enable_metrics] has been called, the same
//! occurrences are counted by the `resilience.event` counter, annotated with the
//! attribute keys below.
//!
//! # Conventions
//!
//! Names follow the [OpenTelemetry naming guidelines](https://opentelemetry.io/docs/specs/semconv/general/naming/#general-naming-considerations).

use std::borrow::Cow;

#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;

/// Key used to annotate the name of the balancer or client that emitted an event.
pub const PIPELINE_NAME: &str = "resilience.pipeline.name";

/// Key used to annotate the component that emitted an event, either `balancer` or `client`.
pub const STRATEGY_NAME: &str = "resilience.strategy.name";

/// Key used to annotate the specific event being emitted.
///
/// Values: `removal`, `revival`, `probe`, `retry`, `budget_exhausted`.
pub const EVENT_NAME: &str = "resilience.event.name";

/// Log event emitted when an instance is removed from normal selection.
pub const REMOVAL_EVENT_NAME: &str = "ricochet.balancer.removal";

/// Log event emitted when a removed instance succeeds again.
pub const REVIVAL_EVENT_NAME: &str = "ricochet.balancer.revival";

/// Log event emitted when a removed instance is handed out as a probe.
pub const PROBE_EVENT_NAME: &str = "ricochet.balancer.probe";

/// Log event emitted before a failed call is retried.
pub const RETRY_EVENT_NAME: &str = "ricochet.client.retry";

/// Log event emitted when a retry is denied by the retry budget.
pub const BUDGET_EXHAUSTED_EVENT_NAME: &str = "ricochet.client.budget_exhausted";

/// Log event emitted when the directory becomes unreachable.
pub const DIRECTORY_LOST_EVENT_NAME: &str = "ricochet.directory.lost";

/// Log event emitted when the directory becomes reachable again.
pub const DIRECTORY_RESTORED_EVENT_NAME: &str = "ricochet.directory.restored";

pub(crate) const BALANCER_STRATEGY: &str = "balancer";
pub(crate) const CLIENT_STRATEGY: &str = "client";

pub(crate) const REMOVAL: &str = "removal";
pub(crate) const REVIVAL: &str = "revival";
pub(crate) const PROBE: &str = "probe";
pub(crate) const RETRY: &str = "retry";
pub(crate) const BUDGET_EXHAUSTED: &str = "budget_exhausted";

/// Per-component telemetry state created from a [`Context`][crate::Context].
#[derive(Debug, Clone)]
pub(crate) struct Telemetry {
    pub(crate) name: Cow<'static, str>,
    #[cfg_attr(not(any(feature = "metrics", test)), expect(dead_code, reason = "only read when reporting metrics"))]
    pub(crate) strategy: &'static str,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) event_reporter: Option<opentelemetry::metrics::Counter<u64>>,
}

impl Telemetry {
    #[cfg_attr(
        not(any(feature = "metrics", test)),
        expect(unused_variables, clippy::unused_self, reason = "unused when metrics feature not used")
    )]
    pub(crate) fn report(&self, event: &'static str) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(reporter) = &self.event_reporter {
            reporter.add(
                1,
                &[
                    opentelemetry::KeyValue::new(PIPELINE_NAME, self.name.clone()),
                    opentelemetry::KeyValue::new(STRATEGY_NAME, self.strategy),
                    opentelemetry::KeyValue::new(EVENT_NAME, event),
                ],
            );
        }
    }
}
