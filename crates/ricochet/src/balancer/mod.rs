// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Weighted, health-aware instance selection.
//!
//! A [`Balancer`] holds the current pool of instances of one service. Each logical call
//! asks it for an [`Attempt`], issues the call against [`Attempt::endpoint`], and reports
//! the outcome with [`Attempt::mark_good`] or [`Attempt::mark_bad`]. A failed attempt can
//! be turned into the next one with [`Attempt::next`], which steers away from the
//! endpoints already tried while alternatives exist.
//!
//! # Selection
//!
//! The pool is a multiset: an endpoint listed three times has weight 3. Instances are
//! ranked by in-flight attempts per unit of weight, and a slot is drawn uniformly among
//! the best-ranked ones. With nothing in flight this is a plain weighted draw; under load
//! it keeps concurrent attempts off the same instance while an idle one exists.
//!
//! # Health
//!
//! An instance that fails [`consecutive_failures`][crate::config::BalancerConfig::consecutive_failures]
//! times in a row is removed from normal selection for a jittered backoff. It is only
//! handed out while nothing healthier exists, or once the backoff has elapsed, as a
//! probe. A successful probe revives it; a failed probe removes it again with a longer
//! backoff. A pool where every instance is removed still hands out attempts.
//!
//! # Examples
//!
//! ```
//! use http::Uri;
//! use ricochet::Context;
//! use ricochet::balancer::Balancer;
//! use ricochet::config::BalancerConfig;
//! use tick::Clock;
//!
//! # fn example(clock: &Clock) -> Result<(), ricochet::Error> {
//! let balancer = Balancer::new(&Context::new(clock).name("users"), &BalancerConfig::default());
//! balancer.update([Uri::from_static("http://10.0.0.1/"), Uri::from_static("http://10.0.0.2/")]);
//!
//! let mut attempt = balancer.create_attempt()?;
//! // issue the call against `attempt.endpoint()`
//! attempt.mark_bad("connect")?;
//!
//! let mut attempt = attempt.next()?;
//! attempt.mark_good()?;
//! # Ok(())
//! # }
//! ```

mod attempt;
mod health;
mod registry;

use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub use attempt::Attempt;
pub use health::HealthState;
use http::Uri;
use tick::Clock;
use tracing::Level;

use self::health::{HealthEvent, Outcome};
use self::registry::{Instance, Registry};
use crate::backoff::DecorrelatedJitter;
use crate::config::BalancerConfig;
use crate::context::Context;
use crate::error::{ERR_POISONED_LOCK, Error};
use crate::rnd::Rnd;
use crate::telemetry::{
    BALANCER_STRATEGY, PROBE, PROBE_EVENT_NAME, REMOVAL, REMOVAL_EVENT_NAME, REVIVAL, REVIVAL_EVENT_NAME, Telemetry,
};

/// A weighted pool of instances of one service.
///
/// Cloning is cheap and clones share the pool.
#[derive(Debug, Clone)]
pub struct Balancer {
    inner: Arc<BalancerInner>,
}

#[derive(Debug)]
pub(crate) struct BalancerInner {
    registry: Mutex<Registry>,
    threshold: u32,
    policy: DecorrelatedJitter,
    clock: Clock,
    telemetry: Telemetry,
    rnd: Rnd,
}

/// A point-in-time view of one instance in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    endpoint: Uri,
    weight: u32,
    in_flight: u32,
    consecutive_failures: u32,
    health: HealthState,
    removed_at: Option<Instant>,
}

impl InstanceInfo {
    /// The endpoint of the instance.
    #[must_use]
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    /// How many times the endpoint is listed in the pool.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Attempts currently outstanding against the instance.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Current health of the instance.
    #[must_use]
    pub fn health(&self) -> HealthState {
        self.health
    }

    /// When the instance was last removed, unless it is healthy.
    #[must_use]
    pub fn removed_at(&self) -> Option<Instant> {
        self.removed_at
    }
}

impl Balancer {
    /// Creates a balancer with an empty pool.
    #[must_use]
    pub fn new(context: &Context, config: &BalancerConfig) -> Self {
        Self::with_rnd(context, config, Rnd::default())
    }

    pub(crate) fn with_rnd(context: &Context, config: &BalancerConfig, rnd: Rnd) -> Self {
        let policy = DecorrelatedJitter::new(config.get_min_backoff(), config.get_max_backoff());
        #[cfg(test)]
        let policy = policy.with_rnd(rnd.clone());

        Self {
            inner: Arc::new(BalancerInner {
                registry: Mutex::new(Registry::default()),
                threshold: config.get_consecutive_failures().max(1),
                policy,
                clock: context.clock().clone(),
                telemetry: context.create_telemetry(BALANCER_STRATEGY),
                rnd,
            }),
        }
    }

    /// Replaces the pool. Repeated endpoints add weight.
    ///
    /// Endpoints that stay in the pool keep their health; attempts against endpoints that
    /// left it complete normally.
    pub fn update(&self, endpoints: impl IntoIterator<Item = Uri>) {
        self.inner.registry.lock().expect(ERR_POISONED_LOCK).update(endpoints);
    }

    /// Replaces the pool with endpoints paired with their weight.
    ///
    /// Weights of repeated endpoints add up. Endpoints with a total weight of zero are
    /// left out of the pool.
    pub fn update_weighted(&self, endpoints: impl IntoIterator<Item = (Uri, u32)>) {
        self.inner
            .registry
            .lock()
            .expect(ERR_POISONED_LOCK)
            .update_weighted(endpoints);
    }

    /// Picks an instance for the first attempt of a logical call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] when the pool is empty.
    pub fn create_attempt(&self) -> Result<Attempt, Error> {
        BalancerInner::create_attempt(&self.inner, Vec::new())
    }

    /// Returns the current pool with the health of each instance.
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceInfo> {
        let now = self.inner.clock.instant();
        let registry = self.inner.registry.lock().expect(ERR_POISONED_LOCK);

        registry
            .entries()
            .iter()
            .map(|entry| {
                let mut state = entry.instance.lock();
                state.refresh(now);

                InstanceInfo {
                    endpoint: entry.instance.endpoint().clone(),
                    weight: entry.weight,
                    in_flight: state.in_flight,
                    consecutive_failures: state.consecutive_failures,
                    health: state.state(),
                    removed_at: state.removed_at(),
                }
            })
            .collect()
    }

    /// The name the balancer reports telemetry under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.telemetry.name
    }
}

impl BalancerInner {
    pub(crate) fn create_attempt(this: &Arc<Self>, mut visited: Vec<Uri>) -> Result<Attempt, Error> {
        let now = this.clock.instant();

        let selected = this
            .registry
            .lock()
            .expect(ERR_POISONED_LOCK)
            .select(&mut visited, now, &this.rnd);

        let Some((instance, event)) = selected else {
            return Err(Error::ServiceUnavailable {
                service: this.telemetry.name.clone(),
            });
        };

        if let Some(event) = event {
            this.emit(instance.endpoint(), event);
        }

        Ok(Attempt::new(Arc::clone(this), instance, visited))
    }

    pub(crate) fn complete(&self, instance: &Instance, outcome: Outcome) {
        let now = self.clock.instant();
        let event = instance.lock().complete(outcome, now, self.threshold, &self.policy);

        if let Some(event) = event {
            self.emit(instance.endpoint(), event);
        }
    }

    fn emit(&self, endpoint: &Uri, event: HealthEvent) {
        match event {
            HealthEvent::Removed { failures, backoff } => {
                tracing::event!(
                    name: REMOVAL_EVENT_NAME,
                    Level::WARN,
                    balancer.name = %self.telemetry.name,
                    instance.endpoint = %endpoint,
                    instance.failures = failures,
                    instance.removal.backoff = backoff.as_secs_f32(),
                );
                self.telemetry.report(REMOVAL);
            }
            HealthEvent::Revived { failures } => {
                tracing::event!(
                    name: REVIVAL_EVENT_NAME,
                    Level::INFO,
                    balancer.name = %self.telemetry.name,
                    instance.endpoint = %endpoint,
                    instance.failures = failures,
                );
                self.telemetry.report(REVIVAL);
            }
            HealthEvent::Probed => {
                tracing::event!(
                    name: PROBE_EVENT_NAME,
                    Level::INFO,
                    balancer.name = %self.telemetry.name,
                    instance.endpoint = %endpoint,
                );
                self.telemetry.report(PROBE);
            }
        }
    }

    pub(crate) fn name(&self) -> &Cow<'static, str> {
        &self.telemetry.name
    }
}
