// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use tick::Clock;

use crate::telemetry::Telemetry;

pub(crate) const DEFAULT_NAME: &str = "default";

/// Shared dependencies for balancers and clients.
///
/// A context carries the clock used for all timing decisions, the name under which
/// telemetry is reported and, optionally, the counter metrics are reported to. Pass the same
/// context to a [`Balancer`][crate::balancer::Balancer] and the
/// [`Client`][crate::client::Client] that draws from it to correlate their telemetry.
///
/// # Examples
///
/// ```
/// use ricochet::Context;
/// use tick::Clock;
///
/// # fn example(clock: &Clock) {
/// let context = Context::new(clock).name("user_service");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    clock: Clock,
    name: Cow<'static, str>,
    #[cfg(any(feature = "metrics", test))]
    events: Option<opentelemetry::metrics::Counter<u64>>,
}

impl Context {
    /// Creates a context with the given clock. The name defaults to `"default"`.
    pub fn new(clock: impl AsRef<Clock>) -> Self {
        Self {
            clock: clock.as_ref().clone(),
            name: Cow::Borrowed(DEFAULT_NAME),
            #[cfg(any(feature = "metrics", test))]
            events: None,
        }
    }

    /// Sets the name used for telemetry correlation. Prefer `snake_case`.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Enables metrics reporting with the given OpenTelemetry meter provider.
    #[must_use]
    #[cfg(any(feature = "metrics", test))]
    pub fn enable_metrics(self, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        Self {
            events: Some(crate::telemetry::metrics::event_counter(provider)),
            ..self
        }
    }

    pub(crate) fn clock(&self) -> &Clock {
        &self.clock
    }

    pub(crate) fn get_name(&self) -> &Cow<'static, str> {
        &self.name
    }

    pub(crate) fn create_telemetry(&self, strategy: &'static str) -> Telemetry {
        Telemetry {
            name: self.name.clone(),
            strategy,
            #[cfg(any(feature = "metrics", test))]
            event_reporter: self.events.clone(),
        }
    }
}
