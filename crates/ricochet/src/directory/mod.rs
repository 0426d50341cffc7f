// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Feeding a balancer from a service directory.
//!
//! A [`RefreshLoop`] periodically asks a [`DirectoryClient`] for the instances of a
//! service and replaces the pool of a [`Balancer`][crate::balancer::Balancer] with them.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ricochet::Context;
//! use ricochet::balancer::Balancer;
//! use ricochet::config::{BalancerConfig, RefreshConfig};
//! use ricochet::directory::{BoxError, DirectoryClient, InstanceSnapshot, RefreshLoop, ServiceDescriptor};
//! use tick::Clock;
//!
//! struct StaticDirectory;
//!
//! impl DirectoryClient for StaticDirectory {
//!     async fn lookup(&self, service_type: &str, pool: &str) -> Result<InstanceSnapshot, BoxError> {
//!         let descriptor = ServiceDescriptor::new("1").property("http", "http://10.0.0.1:8080/");
//!         Ok(InstanceSnapshot::new(service_type, pool, vec![descriptor]).max_age(Duration::from_secs(30)))
//!     }
//!
//!     async fn refresh(&self, previous: &InstanceSnapshot) -> Result<InstanceSnapshot, BoxError> {
//!         self.lookup(previous.service_type(), previous.pool()).await
//!     }
//! }
//!
//! # async fn example(clock: &Clock) {
//! let context = Context::new(clock).name("users");
//! let balancer = Balancer::new(&context, &BalancerConfig::default());
//!
//! let refresh = RefreshLoop::new(&context, "users", RefreshConfig::default(), Arc::new(StaticDirectory), balancer.clone());
//! let handle = refresh.handle();
//!
//! let driver = refresh.start().await;
//! assert_eq!(balancer.instances().len(), 1);
//!
//! // spawn `driver.run()` on your runtime; stop it when shutting down
//! handle.stop();
//! driver.run().await;
//! # }
//! ```

mod refresh;
mod snapshot;

use recoverable::{Recovery, RecoveryInfo};
pub use refresh::{RefreshDriver, RefreshHandle, RefreshLoop, RefreshStatus};
pub use snapshot::{InstanceSnapshot, ServiceDescriptor};

/// A type-erased directory failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Looks up the instances of a service.
pub trait DirectoryClient: Send + Sync + 'static {
    /// Fetches the instances of `service_type` in `pool`.
    fn lookup(&self, service_type: &str, pool: &str) -> impl Future<Output = Result<InstanceSnapshot, BoxError>> + Send;

    /// Fetches a newer version of `previous`.
    ///
    /// Directories that support conditional requests can use the previous snapshot to
    /// answer cheaply when nothing changed.
    fn refresh(&self, previous: &InstanceSnapshot) -> impl Future<Output = Result<InstanceSnapshot, BoxError>> + Send;
}

/// Why a refresh cycle failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DirectoryError {
    /// The directory did not answer within [`RefreshConfig::call_timeout`][crate::config::RefreshConfig::call_timeout].
    #[error("directory call timed out")]
    Timeout,

    /// The directory client failed.
    #[error("directory lookup failed: {0}")]
    Lookup(#[source] BoxError),
}

impl Recovery for DirectoryError {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Timeout => RecoveryInfo::retry(),
            Self::Lookup(_) => RecoveryInfo::unavailable(),
        }
    }
}
