// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use recoverable::{Recovery, RecoveryInfo};

use crate::error::Error;

/// The failure of a logical call made through a client.
///
/// Only the final outcome is surfaced: when retries run out, the caller sees the failure
/// of the last attempt.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecuteError<E> {
    /// No instance could be selected.
    #[error(transparent)]
    Unavailable(#[from] Error),

    /// The last attempt failed with this transport error.
    #[error(transparent)]
    Transport(E),

    /// The client was closed before the call started.
    #[error("client is closed")]
    Closed,
}

impl<E> ExecuteError<E> {
    /// Returns the transport error, if the call failed with one.
    #[must_use]
    pub fn into_transport(self) -> Option<E> {
        match self {
            Self::Transport(error) => Some(error),
            Self::Unavailable(_) | Self::Closed => None,
        }
    }
}

impl<E: Recovery> Recovery for ExecuteError<E> {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Unavailable(error) => error.recovery(),
            Self::Transport(error) => error.recovery(),
            Self::Closed => RecoveryInfo::never(),
        }
    }
}
