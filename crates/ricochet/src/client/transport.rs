// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use http::Uri;
use recoverable::Recovery;

/// Sends requests to a single endpoint on behalf of a [`Client`][super::Client].
///
/// The transport knows nothing about instances or retries; it is handed the endpoint the
/// balancer picked and reports a plain success or failure. Failures classify themselves
/// through [`Recovery`]: [`RecoveryKind::Retry`][recoverable::RecoveryKind::Retry] and
/// [`RecoveryKind::Unavailable`][recoverable::RecoveryKind::Unavailable] are retried,
/// anything else is surfaced as is. A delay attached to the recovery information, such
/// as one parsed from a `Retry-After` header, stretches the wait before the next attempt.
///
/// # Examples
///
/// ```
/// use http::Uri;
/// use recoverable::{Recovery, RecoveryInfo};
/// use ricochet::client::Transport;
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("connection refused")]
/// struct ConnectError;
///
/// impl Recovery for ConnectError {
///     fn recovery(&self) -> RecoveryInfo {
///         RecoveryInfo::retry()
///     }
/// }
///
/// struct Echo;
///
/// impl Transport for Echo {
///     type Request = String;
///     type Response = String;
///     type Error = ConnectError;
///
///     async fn send(&self, endpoint: &Uri, request: &String) -> Result<String, ConnectError> {
///         Ok(format!("{endpoint} {request}"))
///     }
/// }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// The request type. It is borrowed by every attempt of a call.
    type Request: Send + Sync;

    /// The response type.
    type Response: Send;

    /// The failure type.
    type Error: std::error::Error + Recovery + Send + Sync + 'static;

    /// Sends `request` to `endpoint`.
    fn send(&self, endpoint: &Uri, request: &Self::Request) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send;
}

/// The blocking counterpart of [`Transport`], used by [`BlockingClient`][super::BlockingClient].
pub trait BlockingTransport: Send + Sync + 'static {
    /// The request type.
    type Request;

    /// The response type.
    type Response;

    /// The failure type.
    type Error: std::error::Error + Recovery + Send + Sync + 'static;

    /// Sends `request` to `endpoint`, blocking the calling thread until it completes.
    ///
    /// # Errors
    ///
    /// Returns the failure of the call, classified through [`Recovery`].
    fn send(&self, endpoint: &Uri, request: &Self::Request) -> Result<Self::Response, Self::Error>;
}
