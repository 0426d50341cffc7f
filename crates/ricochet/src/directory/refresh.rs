// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{Either, select};
use tick::{Clock, FutureExt};
use tokio::sync::watch;

use super::{DirectoryClient, DirectoryError, InstanceSnapshot};
use crate::backoff::ErrorBackoff;
use crate::balancer::Balancer;
use crate::config::RefreshConfig;
use crate::context::Context;

/// Keeps a [`Balancer`] in sync with the directory.
///
/// Each cycle asks the directory for the current instances of one service type and
/// pool, pushes them into the balancer, and schedules the next cycle after the snapshot's
/// max-age (or [`RefreshConfig::default_delay`]). Failed cycles are retried with an
/// exponential backoff; losing and regaining the directory is logged once per outage.
///
/// Obtain a [`RefreshHandle`] with [`handle`][Self::handle] before calling
/// [`start`][Self::start], then spawn [`RefreshDriver::run`] on the runtime of your choice.
pub struct RefreshLoop<D> {
    client: Arc<D>,
    balancer: Balancer,
    service_type: Cow<'static, str>,
    config: RefreshConfig,
    clock: Clock,
    snapshot: Option<InstanceSnapshot>,
    backoff: ErrorBackoff,
    stop: Arc<watch::Sender<bool>>,
}

/// A started refresh loop, ready to be driven.
pub struct RefreshDriver<D> {
    refresh: RefreshLoop<D>,
    next_delay: Duration,
}

/// Stops a refresh loop from the outside.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    stop: Arc<watch::Sender<bool>>,
}

/// Health of the directory as seen by a refresh loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStatus {
    failures: u32,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
    snapshot: Option<InstanceSnapshot>,
}

impl RefreshStatus {
    /// Failed cycles since the last successful one.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// When a cycle last succeeded.
    #[must_use]
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// When a cycle last failed.
    #[must_use]
    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// The last snapshot received from the directory.
    #[must_use]
    pub fn snapshot(&self) -> Option<&InstanceSnapshot> {
        self.snapshot.as_ref()
    }
}

impl RefreshHandle {
    /// Stops the loop. An in-progress directory call is abandoned.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Whether [`stop`][Self::stop] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

impl<D> std::fmt::Debug for RefreshLoop<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshLoop")
            .field("service_type", &self.service_type)
            .field("config", &self.config)
            .field("snapshot", &self.snapshot)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl<D> std::fmt::Debug for RefreshDriver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshDriver")
            .field("refresh", &self.refresh)
            .field("next_delay", &self.next_delay)
            .finish()
    }
}

impl<D: DirectoryClient> RefreshLoop<D> {
    /// Creates a loop that feeds `balancer` with the instances of `service_type`.
    #[must_use]
    pub fn new(
        context: &Context,
        service_type: impl Into<Cow<'static, str>>,
        config: RefreshConfig,
        client: Arc<D>,
        balancer: Balancer,
    ) -> Self {
        let service_type = service_type.into();
        let target = format!("{service_type}/{}", config.get_pool());

        Self {
            client,
            balancer,
            backoff: ErrorBackoff::new(
                context.clock().clone(),
                config.get_error_min_backoff(),
                config.get_error_max_backoff(),
                format!("Cannot connect to directory for refresh ({target})"),
                format!("Directory connect succeeded for refresh ({target})"),
            ),
            service_type,
            config,
            clock: context.clock().clone(),
            snapshot: None,
            stop: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Returns a handle that stops the loop.
    #[must_use]
    pub fn handle(&self) -> RefreshHandle {
        RefreshHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Returns what the loop knows about the directory.
    #[must_use]
    pub fn status(&self) -> RefreshStatus {
        RefreshStatus {
            failures: self.backoff.failures(),
            last_success: self.backoff.last_success(),
            last_failure: self.backoff.last_failure(),
            snapshot: self.snapshot.clone(),
        }
    }

    /// Runs the first cycle, giving up on it after [`RefreshConfig::initial_timeout`].
    ///
    /// A slow directory does not hold up startup: when the first cycle times out, the
    /// driver retries right away.
    pub async fn start(mut self) -> RefreshDriver<D> {
        let clock = self.clock.clone();
        let initial_timeout = self.config.get_initial_timeout();

        let next_delay = match self.refresh_once().timeout(&clock, initial_timeout).await {
            Ok(delay) => delay,
            Err(_) => Duration::ZERO,
        };

        RefreshDriver { refresh: self, next_delay }
    }

    /// Runs one cycle and returns the delay before the next one.
    ///
    /// The directory call is bounded by [`RefreshConfig::call_timeout`]; a timed out
    /// call counts as a failure.
    pub async fn refresh_once(&mut self) -> Duration {
        match self.fetch().await {
            Ok(snapshot) => {
                self.balancer.update_weighted(snapshot.endpoints());
                self.backoff.succeeded();

                let delay = snapshot.get_max_age().unwrap_or_else(|| self.config.get_default_delay());
                self.snapshot = Some(snapshot);
                delay
            }
            Err(error) => self.backoff.failed(&error),
        }
    }

    async fn fetch(&self) -> Result<InstanceSnapshot, DirectoryError> {
        let call = async {
            match &self.snapshot {
                Some(previous) => self.client.refresh(previous).await,
                None => self.client.lookup(&self.service_type, self.config.get_pool()).await,
            }
        };

        match call.timeout(&self.clock, self.config.get_call_timeout()).await {
            Ok(result) => result.map_err(DirectoryError::Lookup),
            Err(_) => Err(DirectoryError::Timeout),
        }
    }
}

impl<D: DirectoryClient> RefreshDriver<D> {
    /// The wait before the first cycle of [`run`][Self::run].
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Returns what the loop knows about the directory.
    #[must_use]
    pub fn status(&self) -> RefreshStatus {
        self.refresh.status()
    }

    /// Refreshes until the loop is stopped through a [`RefreshHandle`].
    ///
    /// Waits never exceed [`RefreshConfig::watchdog_interval`], so a cycle runs at least
    /// that often whatever the directory asks for.
    #[cfg_attr(test, mutants::skip)] // Mutations make the loop spin forever.
    pub async fn run(mut self) {
        let stop = Arc::clone(&self.refresh.stop);
        let mut stopped = stop.subscribe();
        let watchdog = self.refresh.config.get_watchdog_interval();
        let clock = self.refresh.clock.clone();

        loop {
            let wait = self.next_delay.min(watchdog);

            {
                let shutdown = pin!(stopped.wait_for(|stopped| *stopped));
                if let Either::Right(_) = select(pin!(clock.delay(wait)), shutdown).await {
                    break;
                }
            }

            let shutdown = pin!(stopped.wait_for(|stopped| *stopped));
            match select(pin!(self.refresh.refresh_once()), shutdown).await {
                Either::Left((delay, _)) => self.next_delay = delay,
                Either::Right(_) => break,
            }
        }

        tracing::debug!(directory.type = %self.refresh.service_type, "directory refresh stopped");
    }
}
