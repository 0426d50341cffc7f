// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use recoverable::{Recovery, RecoveryInfo};

pub(crate) const ERR_POISONED_LOCK: &str = "poisoned lock - cannot continue execution because security and privacy guarantees can no longer be upheld";

/// Errors raised by the balancer and by misuse of an [`Attempt`][crate::balancer::Attempt].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The balancer has no configured instances.
    #[error("service `{service}` has no available instances")]
    ServiceUnavailable {
        /// Name of the balancer that had nothing to hand out.
        service: Cow<'static, str>,
    },

    /// A terminal call was made on an attempt that already received one.
    #[error("attempt has already been marked good or bad")]
    AttemptCompleted,

    /// [`Attempt::next`][crate::balancer::Attempt::next] was called before the attempt was marked bad.
    #[error("next attempt requested before the current attempt was marked bad")]
    AttemptNotFailed,
}

impl Recovery for Error {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::ServiceUnavailable { .. } => RecoveryInfo::unavailable(),
            Self::AttemptCompleted | Self::AttemptNotFailed => RecoveryInfo::never(),
        }
    }
}
