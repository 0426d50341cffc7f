// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use http::Uri;

use super::BalancerInner;
use super::health::Outcome;
use super::registry::Instance;
use crate::error::Error;

/// Category recorded for an attempt dropped without a terminal call.
pub(crate) const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    InProgress,
    Succeeded,
    Failed,
}

/// One attempt of a logical call against a selected instance.
///
/// Every attempt receives exactly one terminal call, [`mark_good`][Self::mark_good] or
/// [`mark_bad`][Self::mark_bad]. A failed attempt may be turned into the following one
/// with [`next`][Self::next], which prefers endpoints not yet tried by this call.
///
/// Dropping an attempt that is still in progress marks it bad, so abandoned calls do not
/// leave the instance looking busy.
#[derive(Debug)]
pub struct Attempt {
    balancer: Arc<BalancerInner>,
    instance: Arc<Instance>,
    visited: Vec<Uri>,
    progress: Progress,
}

impl Attempt {
    pub(crate) fn new(balancer: Arc<BalancerInner>, instance: Arc<Instance>, mut visited: Vec<Uri>) -> Self {
        if !visited.contains(instance.endpoint()) {
            visited.push(instance.endpoint().clone());
        }

        Self {
            balancer,
            instance,
            visited,
            progress: Progress::InProgress,
        }
    }

    /// The endpoint to issue this attempt against.
    #[must_use]
    pub fn endpoint(&self) -> &Uri {
        self.instance.endpoint()
    }

    /// Records that the attempt succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AttemptCompleted`] if the attempt was already marked.
    pub fn mark_good(&mut self) -> Result<(), Error> {
        self.finish(Outcome::Success)
    }

    /// Records that the attempt failed. `category` classifies the failure, for example
    /// `"connect"` or `"503 status code"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AttemptCompleted`] if the attempt was already marked.
    pub fn mark_bad(&mut self, category: &str) -> Result<(), Error> {
        self.finish(Outcome::Failure)?;

        tracing::debug!(
            balancer.name = %self.balancer.name(),
            instance.endpoint = %self.endpoint(),
            attempt.category = category,
            "attempt failed",
        );

        Ok(())
    }

    /// Selects the instance for the following attempt of the same call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AttemptNotFailed`] unless this attempt was marked bad, and
    /// [`Error::ServiceUnavailable`] if the pool has become empty.
    pub fn next(mut self) -> Result<Self, Error> {
        if self.progress != Progress::Failed {
            return Err(Error::AttemptNotFailed);
        }

        let visited = std::mem::take(&mut self.visited);
        BalancerInner::create_attempt(&self.balancer, visited)
    }

    fn finish(&mut self, outcome: Outcome) -> Result<(), Error> {
        if self.progress != Progress::InProgress {
            return Err(Error::AttemptCompleted);
        }

        self.progress = match outcome {
            Outcome::Success => Progress::Succeeded,
            Outcome::Failure => Progress::Failed,
        };
        self.balancer.complete(&self.instance, outcome);

        Ok(())
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        if self.progress == Progress::InProgress {
            let _ = self.mark_bad(CANCELLED);
        }
    }
}
