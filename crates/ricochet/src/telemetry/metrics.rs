// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::InstrumentationScope;
use opentelemetry::metrics::{Counter, MeterProvider};

const SCOPE_NAME: &str = "ricochet";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

pub(crate) const EVENT_COUNTER_NAME: &str = "resilience.event";

/// Creates the counter every balancer and client event is reported to.
pub(crate) fn event_counter(provider: &dyn MeterProvider) -> Counter<u64> {
    let scope = InstrumentationScope::builder(SCOPE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(SCHEMA_URL)
        .build();

    provider
        .meter_with_scope(scope)
        .u64_counter(EVENT_COUNTER_NAME)
        .with_description("Number of removals, revivals, probes, retries and exhausted retry budgets.")
        .with_unit("{event}")
        .build()
}
