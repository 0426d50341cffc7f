// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use crate::backoff::DecorrelatedJitter;

/// Publicly observable health of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HealthState {
    /// The instance takes part in normal selection.
    Healthy,

    /// The instance failed too many times in a row and is only handed out when nothing better exists.
    Removed,

    /// A removed instance was handed out again to find out whether it recovered.
    Probing,
}

/// Internal health with the timing needed to drive transitions.
///
/// `since` is the moment of the latest removal and is kept while probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Health {
    Healthy,
    Removed { since: Instant, until: Instant, backoff: Duration },
    Probing { since: Instant, backoff: Duration },
}

/// Result of a terminal call on an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
}

/// A health change worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthEvent {
    Removed { failures: u32, backoff: Duration },
    Revived { failures: u32 },
    Probed,
}

/// Mutable per-instance bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InstanceState {
    pub(crate) in_flight: u32,
    pub(crate) consecutive_failures: u32,
    pub(crate) health: Health,
}

impl Default for InstanceState {
    fn default() -> Self {
        Self {
            in_flight: 0,
            consecutive_failures: 0,
            health: Health::Healthy,
        }
    }
}

impl InstanceState {
    pub(crate) fn state(&self) -> HealthState {
        match self.health {
            Health::Healthy => HealthState::Healthy,
            Health::Removed { .. } => HealthState::Removed,
            Health::Probing { .. } => HealthState::Probing,
        }
    }

    /// Moves a removed instance whose backoff elapsed into probing.
    pub(crate) fn refresh(&mut self, now: Instant) {
        if let Health::Removed { since, until, backoff } = self.health
            && until <= now
        {
            self.health = Health::Probing { since, backoff };
        }
    }

    /// Whether the instance should only be picked when nothing better exists.
    pub(crate) fn is_degraded(&self) -> bool {
        match self.health {
            Health::Healthy => false,
            Health::Removed { .. } => true,
            Health::Probing { .. } => self.in_flight > 0,
        }
    }

    /// When the instance was last removed, if it is not healthy.
    pub(crate) fn removed_at(&self) -> Option<Instant> {
        match self.health {
            Health::Healthy => None,
            Health::Removed { since, .. } | Health::Probing { since, .. } => Some(since),
        }
    }

    /// Records that the instance was handed out.
    pub(crate) fn select(&mut self) -> Option<HealthEvent> {
        let event = match self.health {
            Health::Healthy => None,
            Health::Removed { since, backoff, .. } => {
                self.health = Health::Probing { since, backoff };
                Some(HealthEvent::Probed)
            }
            Health::Probing { .. } => (self.in_flight == 0).then_some(HealthEvent::Probed),
        };

        self.in_flight = self.in_flight.saturating_add(1);
        event
    }

    /// Applies the outcome of an attempt and returns the resulting health change, if any.
    pub(crate) fn complete(&mut self, outcome: Outcome, now: Instant, threshold: u32, policy: &DecorrelatedJitter) -> Option<HealthEvent> {
        self.in_flight = self.in_flight.saturating_sub(1);

        match outcome {
            Outcome::Success => {
                let failures = std::mem::take(&mut self.consecutive_failures);
                let previous = std::mem::replace(&mut self.health, Health::Healthy);

                match previous {
                    Health::Healthy => None,
                    Health::Removed { .. } | Health::Probing { .. } => Some(HealthEvent::Revived { failures }),
                }
            }
            Outcome::Failure => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);

                let previous_backoff = match self.health {
                    Health::Healthy if self.consecutive_failures >= threshold => None,
                    Health::Probing { backoff, .. } => Some(backoff),
                    Health::Healthy | Health::Removed { .. } => return None,
                };

                let backoff = policy.backoff(previous_backoff, None);
                self.health = Health::Removed {
                    since: now,
                    until: now.checked_add(backoff).unwrap_or(now),
                    backoff,
                };

                Some(HealthEvent::Removed {
                    failures: self.consecutive_failures,
                    backoff,
                })
            }
        }
    }
}
