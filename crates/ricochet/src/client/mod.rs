// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resilient clients.
//!
//! A [`Client`] turns one logical call into a chain of attempts against instances picked
//! by a [`Balancer`]. Failed attempts are retried on a different instance when the failure
//! is retryable, attempts remain, and the client's [`RetryBudget`] allows it. Between
//! attempts the client waits for a decorrelated-jitter backoff, stretched to any delay
//! the failure suggests. The caller only ever sees the final response or the last failure.
//!
//! [`BlockingClient`] does the same for a [`BlockingTransport`], parking the calling
//! thread during backoff.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use http::Uri;
//! use recoverable::{Recovery, RecoveryInfo};
//! use ricochet::Context;
//! use ricochet::balancer::Balancer;
//! use ricochet::client::{ClientBuilder, Transport};
//! use ricochet::config::{BalancerConfig, ClientConfig};
//! use tick::Clock;
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("connection refused")]
//! struct ConnectError;
//!
//! impl Recovery for ConnectError {
//!     fn recovery(&self) -> RecoveryInfo {
//!         RecoveryInfo::retry()
//!     }
//! }
//!
//! struct Echo;
//!
//! impl Transport for Echo {
//!     type Request = String;
//!     type Response = String;
//!     type Error = ConnectError;
//!
//!     async fn send(&self, endpoint: &Uri, request: &String) -> Result<String, ConnectError> {
//!         Ok(format!("{endpoint}{request}"))
//!     }
//! }
//!
//! # async fn example(clock: &Clock) {
//! let context = Context::new(clock).name("echo");
//! let balancer = Balancer::new(&context, &BalancerConfig::default());
//! balancer.update([Uri::from_static("http://10.0.0.1/")]);
//!
//! let client = ClientBuilder::new(&context, balancer)
//!     .config(ClientConfig::default().max_attempts(2))
//!     .retry_if(|request: &String| !request.starts_with("POST"))
//!     .build(Arc::new(Echo));
//!
//! let response = client.execute("hello".to_string()).await;
//! assert_eq!(response.unwrap(), "http://10.0.0.1/hello");
//! # }
//! ```

mod error;
mod retry;
mod transport;

use std::sync::Arc;

pub use error::ExecuteError;
pub use transport::{BlockingTransport, Transport};

use self::retry::{Decision, RetryCore, RetryPredicate};
use crate::balancer::Balancer;
use crate::budget::RetryBudget;
use crate::config::ClientConfig;
use crate::context::Context;

/// Builds a [`Client`] or a [`BlockingClient`].
pub struct ClientBuilder<Req> {
    context: Context,
    balancer: Balancer,
    config: ClientConfig,
    retry_if: Option<RetryPredicate<Req>>,
}

impl<Req> std::fmt::Debug for ClientBuilder<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("context", &self.context)
            .field("balancer", &self.balancer)
            .field("config", &self.config)
            .field("retry_if", &self.retry_if.is_some())
            .finish()
    }
}

impl<Req> ClientBuilder<Req> {
    /// Starts building a client that draws instances from `balancer`.
    #[must_use]
    pub fn new(context: &Context, balancer: Balancer) -> Self {
        Self {
            context: context.clone(),
            balancer,
            config: ClientConfig::default(),
            retry_if: None,
        }
    }

    /// Sets the retry settings.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Restricts retries to requests for which `predicate` returns `true`.
    ///
    /// Use this to keep non-idempotent requests from being sent twice. By default every
    /// request may be retried.
    #[must_use]
    pub fn retry_if(mut self, predicate: impl Fn(&Req) -> bool + Send + Sync + 'static) -> Self {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Builds an async client over `transport`.
    #[must_use]
    pub fn build<T>(self, transport: Arc<T>) -> Client<T>
    where
        T: Transport<Request = Req>,
    {
        Client {
            core: Arc::new(self.into_core()),
            transport,
        }
    }

    /// Builds a blocking client over `transport`.
    #[must_use]
    pub fn build_blocking<T>(self, transport: Arc<T>) -> BlockingClient<T>
    where
        T: BlockingTransport<Request = Req>,
    {
        BlockingClient {
            core: Arc::new(self.into_core()),
            transport,
        }
    }

    fn into_core(self) -> RetryCore<Req> {
        RetryCore::new(&self.context, self.balancer, &self.config, self.retry_if)
    }
}

/// Executes logical calls over a [`Transport`] with retries across instances.
///
/// Cloning is cheap and clones share the retry budget and the closed state.
pub struct Client<T: Transport> {
    core: Arc<RetryCore<T::Request>>,
    transport: Arc<T>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("core", &self.core).finish_non_exhaustive()
    }
}

impl<T: Transport> Client<T> {
    /// Creates a client with the given retry settings and no retry predicate.
    #[must_use]
    pub fn new(context: &Context, balancer: Balancer, config: ClientConfig, transport: Arc<T>) -> Self {
        ClientBuilder::new(context, balancer).config(config).build(transport)
    }

    /// Executes one logical call.
    ///
    /// Dropping the returned future cancels the call: the in-flight attempt is marked bad
    /// and no further attempts are made.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError::Closed`] if the client was closed, [`ExecuteError::Unavailable`]
    /// if no instance could be selected for the first attempt, and [`ExecuteError::Transport`]
    /// with the last failure once retrying stops, including when the pool empties before a
    /// retry.
    pub async fn execute(&self, request: T::Request) -> Result<T::Response, ExecuteError<T::Error>> {
        if self.core.is_closed() {
            return Err(ExecuteError::Closed);
        }

        let mut call = self.core.begin()?;

        loop {
            let error = match self.transport.send(call.attempt.endpoint(), &request).await {
                Ok(response) => {
                    let _ = call.attempt.mark_good();
                    return Ok(response);
                }
                Err(error) => error,
            };

            let Decision::Retry(delay) = self.core.on_failure(&mut call, &request, &error) else {
                return Err(ExecuteError::Transport(error));
            };

            if !self.core.wait(delay).await {
                return Err(ExecuteError::Transport(error));
            }

            call = match RetryCore::<T::Request>::advance(call, delay) {
                Ok(call) => call,
                Err(_) => return Err(ExecuteError::Transport(error)),
            };
        }
    }

    /// Closes the client. Pending retry waits end with their last failure and new calls
    /// fail with [`ExecuteError::Closed`]. The balancer and the transport are left alone.
    pub fn close(&self) {
        self.core.close();
    }

    /// Whether [`close`][Self::close] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// The retry budget shared by calls made through this client.
    #[must_use]
    pub fn retry_budget(&self) -> &RetryBudget {
        self.core.budget()
    }
}

/// Executes logical calls over a [`BlockingTransport`] with retries across instances.
///
/// Backoff waits park the calling thread on the context's clock. With a clock created by
/// `tick::Clock::new_tokio`, timers only fire while the tokio runtime
/// drives them, so do not call [`execute`][Self::execute] from a worker thread of a
/// current-thread runtime: the wait would never finish. Use a multi-threaded runtime, a
/// dedicated thread such as [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html),
/// or the async [`Client`].
pub struct BlockingClient<T: BlockingTransport> {
    core: Arc<RetryCore<T::Request>>,
    transport: Arc<T>,
}

impl<T: BlockingTransport> Clone for BlockingClient<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: BlockingTransport> std::fmt::Debug for BlockingClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient").field("core", &self.core).finish_non_exhaustive()
    }
}

impl<T: BlockingTransport> BlockingClient<T> {
    /// Creates a client with the given retry settings and no retry predicate.
    #[must_use]
    pub fn new(context: &Context, balancer: Balancer, config: ClientConfig, transport: Arc<T>) -> Self {
        ClientBuilder::new(context, balancer).config(config).build_blocking(transport)
    }

    /// Executes one logical call, blocking until it completes.
    ///
    /// # Errors
    ///
    /// Same as [`Client::execute`].
    pub fn execute(&self, request: &T::Request) -> Result<T::Response, ExecuteError<T::Error>> {
        if self.core.is_closed() {
            return Err(ExecuteError::Closed);
        }

        let mut call = self.core.begin()?;

        loop {
            let error = match self.transport.send(call.attempt.endpoint(), request) {
                Ok(response) => {
                    let _ = call.attempt.mark_good();
                    return Ok(response);
                }
                Err(error) => error,
            };

            let Decision::Retry(delay) = self.core.on_failure(&mut call, request, &error) else {
                return Err(ExecuteError::Transport(error));
            };

            if !futures::executor::block_on(self.core.wait(delay)) {
                return Err(ExecuteError::Transport(error));
            }

            call = match RetryCore::<T::Request>::advance(call, delay) {
                Ok(call) => call,
                Err(_) => return Err(ExecuteError::Transport(error)),
            };
        }
    }

    /// Closes the client. See [`Client::close`].
    pub fn close(&self) {
        self.core.close();
    }

    /// Whether [`close`][Self::close] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// The retry budget shared by calls made through this client.
    #[must_use]
    pub fn retry_budget(&self) -> &RetryBudget {
        self.core.budget()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use http::Uri;
    use recoverable::{Recovery, RecoveryInfo};
    use tick::{Clock, ClockControl};

    use super::*;
    use crate::config::BalancerConfig;

    #[derive(Debug, Clone, thiserror::Error)]
    #[error("{0}")]
    struct TestError(&'static str, RecoveryInfo);

    impl Recovery for TestError {
        fn recovery(&self) -> RecoveryInfo {
            self.1.clone()
        }
    }

    /// Fails the first `failures` calls, then echoes the endpoint.
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        error: TestError,
        calls: AtomicU32,
        endpoints: Mutex<Vec<Uri>>,
    }

    impl Flaky {
        fn new(failures: u32, error: TestError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                endpoints: Mutex::new(Vec::new()),
            })
        }

        fn respond(&self, endpoint: &Uri) -> Result<String, TestError> {
            self.endpoints.lock().unwrap().push(endpoint.clone());

            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(self.error.clone())
            } else {
                Ok(endpoint.to_string())
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for Flaky {
        type Request = String;
        type Response = String;
        type Error = TestError;

        async fn send(&self, endpoint: &Uri, _request: &String) -> Result<String, TestError> {
            self.respond(endpoint)
        }
    }

    impl BlockingTransport for Flaky {
        type Request = String;
        type Response = String;
        type Error = TestError;

        fn send(&self, endpoint: &Uri, _request: &String) -> Result<String, TestError> {
            self.respond(endpoint)
        }
    }

    static_assertions::assert_impl_all!(Client<Flaky>: Send, Sync, Clone);
    static_assertions::assert_impl_all!(BlockingClient<Flaky>: Send, Sync, Clone);

    fn refused() -> TestError {
        TestError("refused", RecoveryInfo::retry())
    }

    fn setup(endpoints: &[&'static str]) -> (Context, Balancer) {
        let clock = ClockControl::new().auto_advance_timers(true).to_clock();
        let context = Context::new(clock);
        let balancer = Balancer::new(&context, &BalancerConfig::default());
        balancer.update(endpoints.iter().map(|e| Uri::from_static(e)));
        (context, balancer)
    }

    #[test]
    fn success_needs_no_retry() {
        let (context, balancer) = setup(&["http://a/"]);
        let transport = Flaky::new(0, refused());
        let client = Client::new(&context, balancer.clone(), ClientConfig::default(), Arc::clone(&transport));

        let response = futures::executor::block_on(client.execute("ping".to_string())).unwrap();

        assert_eq!(response, "http://a/");
        assert_eq!(transport.calls(), 1);
        assert_eq!(balancer.instances()[0].in_flight(), 0);
    }

    #[test]
    fn retries_on_other_instance() {
        let (context, balancer) = setup(&["http://a/", "http://b/"]);
        let transport = Flaky::new(1, refused());
        let client = Client::new(&context, balancer, ClientConfig::default(), Arc::clone(&transport));

        let _ = futures::executor::block_on(client.execute("ping".to_string())).unwrap();

        let endpoints = transport.endpoints.lock().unwrap().clone();
        assert_eq!(endpoints.len(), 2);
        assert_ne!(endpoints[0], endpoints[1]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let (context, balancer) = setup(&["http://a/"]);
        let transport = Flaky::new(u32::MAX, refused());
        let client = Client::new(&context, balancer, ClientConfig::default().max_attempts(3), Arc::clone(&transport));

        let error = futures::executor::block_on(client.execute("ping".to_string())).unwrap_err();

        assert!(matches!(error, ExecuteError::Transport(TestError("refused", _))));
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn non_retryable_surfaces_immediately() {
        let (context, balancer) = setup(&["http://a/", "http://b/"]);
        let transport = Flaky::new(1, TestError("bad request", RecoveryInfo::never()));
        let client = Client::new(&context, balancer.clone(), ClientConfig::default(), Arc::clone(&transport));

        let error = futures::executor::block_on(client.execute("ping".to_string())).unwrap_err();

        assert_eq!(error.to_string(), "bad request");
        assert_eq!(transport.calls(), 1);
        assert_eq!(balancer.instances().iter().map(|i| i.consecutive_failures()).sum::<u32>(), 1);
    }

    #[test]
    fn predicate_blocks_retry() {
        let (context, balancer) = setup(&["http://a/"]);
        let transport = Flaky::new(1, refused());
        let client = ClientBuilder::new(&context, balancer)
            .retry_if(|request: &String| request != "POST")
            .build(Arc::clone(&transport));

        assert!(futures::executor::block_on(client.execute("POST".to_string())).is_err());
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn empty_pool_is_unavailable() {
        let (context, balancer) = setup(&[]);
        let client = Client::new(&context, balancer, ClientConfig::default(), Flaky::new(0, refused()));

        let error = futures::executor::block_on(client.execute("ping".to_string())).unwrap_err();

        assert!(matches!(error, ExecuteError::Unavailable(crate::Error::ServiceUnavailable { .. })));
    }

    #[test]
    fn closed_client_rejects_calls() {
        let (context, balancer) = setup(&["http://a/"]);
        let transport = Flaky::new(0, refused());
        let client = Client::new(&context, balancer, ClientConfig::default(), Arc::clone(&transport));

        client.close();

        assert!(client.is_closed());
        assert!(matches!(
            futures::executor::block_on(client.execute("ping".to_string())),
            Err(ExecuteError::Closed)
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn close_ends_pending_wait_with_last_failure() {
        let context = Context::new(Clock::new_frozen());
        let balancer = Balancer::new(&context, &BalancerConfig::default());
        balancer.update([Uri::from_static("http://a/")]);
        let transport = Flaky::new(u32::MAX, refused());
        let config = ClientConfig::default().min_backoff(Duration::from_secs(60)).max_backoff(Duration::from_secs(60));
        let client = Client::new(&context, balancer.clone(), config, Arc::clone(&transport));

        let mut call = Box::pin(client.execute("ping".to_string()));
        let waker = std::task::Waker::noop();
        let mut cx = std::task::Context::from_waker(waker);

        assert!(call.as_mut().poll(&mut cx).is_pending());
        client.close();

        let std::task::Poll::Ready(result) = call.as_mut().poll(&mut cx) else {
            panic!("call should finish once the client is closed");
        };
        assert!(matches!(result, Err(ExecuteError::Transport(TestError("refused", _)))));
        assert_eq!(transport.calls(), 1);
        assert_eq!(balancer.instances()[0].in_flight(), 0);
    }

    #[test]
    fn blocking_client_retries() {
        let (context, balancer) = setup(&["http://a/"]);
        let transport = Flaky::new(2, refused());
        let client = BlockingClient::new(&context, balancer.clone(), ClientConfig::default(), Arc::clone(&transport));

        let response = client.execute(&"ping".to_string()).unwrap();

        assert_eq!(response, "http://a/");
        assert_eq!(transport.calls(), 3);
        assert_eq!(balancer.instances()[0].consecutive_failures(), 0);
    }

    #[test]
    fn blocking_client_closed() {
        let (context, balancer) = setup(&["http://a/"]);
        let client = ClientBuilder::new(&context, balancer).build_blocking(Flaky::new(0, refused()));

        client.close();

        assert!(client.is_closed());
        assert!(matches!(client.execute(&"ping".to_string()), Err(ExecuteError::Closed)));
    }

    #[test]
    fn budget_is_shared_by_clones() {
        let (context, balancer) = setup(&["http://a/"]);
        let config = ClientConfig::default().retry_budget_ratio(1.0).retry_budget_min_per_second(0);
        let client = Client::new(&context, balancer, config, Flaky::new(0, refused()));
        let clone = client.clone();

        let _ = futures::executor::block_on(clone.execute("ping".to_string())).unwrap();

        assert_eq!(client.retry_budget().ledger().available(), 1000);
    }
}
