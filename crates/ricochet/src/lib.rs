// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Client-side load balancing and retries over a dynamic set of service instances.
//!
//! A caller talks to a logical service whose instances come and go. This crate picks an
//! instance for every attempt, tracks how each instance behaves, takes misbehaving ones
//! out of rotation for a while, and retries failed calls on other instances while keeping
//! the extra load retries put on the service within a budget.
//!
//! # Overview
//!
//! - [`balancer::Balancer`]: weighted, load-aware selection with per-instance health.
//!   Instances failing repeatedly are removed for a backoff period, then probed with a
//!   single attempt before rejoining the pool.
//! - [`client::Client`] and [`client::BlockingClient`]: execute a logical call as a chain
//!   of attempts, retrying retryable failures on other instances.
//! - [`budget::RetryBudget`]: caps retries to a fraction of recent calls plus a floor.
//! - [`backoff::DecorrelatedJitter`]: randomized, growing delays between retries.
//! - [`directory::RefreshLoop`]: keeps a balancer in sync with a service directory.
//!
//! Every component takes a [`Context`], which carries the [`Clock`][tick::Clock] used for
//! all timing along with an optional name and metrics provider.
//!
//! # Quick Start
//!
//! ```
//! use http::Uri;
//! use ricochet::Context;
//! use ricochet::balancer::Balancer;
//! use ricochet::config::BalancerConfig;
//! use tick::Clock;
//!
//! let context = Context::new(Clock::new_frozen()).name("users");
//! let balancer = Balancer::new(&context, &BalancerConfig::default().consecutive_failures(3));
//! balancer.update([Uri::from_static("http://10.0.0.1/"), Uri::from_static("http://10.0.0.2/")]);
//!
//! let mut attempt = balancer.create_attempt().unwrap();
//! // issue the request against `attempt.endpoint()`
//! attempt.mark_good().unwrap();
//! ```
//!
//! # Recovery Classification
//!
//! Whether a failure is retried is decided from its [`RecoveryInfo`]: failures classified
//! as [`RecoveryKind::Retry`] or [`RecoveryKind::Unavailable`] are retried, anything else
//! ends the call. A delay attached to the recovery info stretches the wait before the
//! next attempt.
//!
//! # Telemetry
//!
//! Removals, revivals, probes, retries and budget exhaustion are logged through
//! [`tracing`] under the event names in [`telemetry`]. With the `metrics` feature, the same
//! events are also counted through OpenTelemetry when a meter provider is set on the
//! [`Context`].
//!
//! # Features
//!
//! - `metrics`: reports resilience events as OpenTelemetry metrics.
//! - `serde`: serialization for the configuration types and directory snapshots.

#[doc(inline)]
pub use recoverable::{Recovery, RecoveryInfo, RecoveryKind};

pub mod backoff;
pub mod balancer;
pub mod budget;
pub mod client;
pub mod config;
pub mod directory;
pub mod telemetry;

mod context;
mod error;
mod rnd;

pub use context::Context;
pub use error::Error;
