//! Interceptors wrap the execution of every GraphQL request.
//!
//! An [`InterceptorChain`] is assembled once from an ordered list of interceptors and a terminal
//! service. The first interceptor is the outermost one: it sees the request first and the
//! response last. Each interceptor gets a [`Next`] standing for the rest of the chain and may
//!
//! * run it with the request unchanged, or with a transformed request,
//! * transform the response it returns,
//! * not run it at all, and answer the request itself.
//!
//! ```rust
//! # use graphql_transport::interceptor::interceptor_fn;
//! let log = interceptor_fn(|request, next| async move {
//!     tracing::info!(id = request.id(), "executing");
//!     next.run(request).await
//! });
//! ```

use std::future::Future;
use std::sync::Arc;
use std::task::Poll;

use futures::future::BoxFuture;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;

use crate::services::execution;

/// A request/response middleware.
#[async_trait::async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(
        &self,
        request: execution::Request,
        next: Next,
    ) -> Result<execution::Response, BoxError>;
}

/// The rest of the chain, as seen from an interceptor.
///
/// Running it consumes it, so an interceptor calls the rest of the chain at most once.
pub struct Next {
    inner: execution::BoxCloneService,
}

impl Next {
    pub(crate) fn new<S>(service: S) -> Self
    where
        S: Service<execution::Request, Response = execution::Response, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            inner: execution::BoxCloneService::new(service),
        }
    }

    /// Run the rest of the chain.
    pub async fn run(self, request: execution::Request) -> execution::ServiceResult {
        self.inner.oneshot(request).await
    }
}

/// An interceptor backed by an async function.
pub fn interceptor_fn<F, Fut>(f: F) -> InterceptorFn<F>
where
    F: Fn(execution::Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = execution::ServiceResult> + Send + 'static,
{
    InterceptorFn { f }
}

/// See [`interceptor_fn`].
pub struct InterceptorFn<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F, Fut> Interceptor for InterceptorFn<F>
where
    F: Fn(execution::Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = execution::ServiceResult> + Send + 'static,
{
    async fn intercept(
        &self,
        request: execution::Request,
        next: Next,
    ) -> Result<execution::Response, BoxError> {
        (self.f)(request, next).await
    }
}

/// [`Layer`] applying one [`Interceptor`].
#[derive(Clone)]
pub struct InterceptorLayer {
    interceptor: Arc<dyn Interceptor>,
}

impl InterceptorLayer {
    pub fn new(interceptor: Arc<dyn Interceptor>) -> Self {
        Self { interceptor }
    }
}

impl<S> Layer<S> for InterceptorLayer {
    type Service = InterceptorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InterceptorService {
            interceptor: self.interceptor.clone(),
            inner,
        }
    }
}

/// [`Service`] applying one [`Interceptor`]. See [`InterceptorLayer`].
#[derive(Clone)]
pub struct InterceptorService<S> {
    interceptor: Arc<dyn Interceptor>,
    inner: S,
}

impl<S> Service<execution::Request> for InterceptorService<S>
where
    S: Service<execution::Request, Response = execution::Response, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    type Response = execution::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        // the inner service is driven to readiness by `Next::run`
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: execution::Request) -> Self::Future {
        let next = Next::new(self.inner.clone());
        let interceptor = self.interceptor.clone();
        Box::pin(async move { interceptor.intercept(request, next).await })
    }
}

/// An immutable chain of interceptors in front of a terminal service.
///
/// Cloning is cheap and every call is an independent run through the chain.
#[derive(Clone)]
pub struct InterceptorChain {
    service: execution::BoxCloneService,
}

impl InterceptorChain {
    pub fn new<S>(interceptors: &[Arc<dyn Interceptor>], terminal: S) -> Self
    where
        S: Service<execution::Request, Response = execution::Response, Error = BoxError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let service = interceptors.iter().rev().fold(
            execution::BoxCloneService::new(terminal),
            |acc, interceptor| {
                execution::BoxCloneService::new(
                    InterceptorLayer::new(interceptor.clone()).layer(acc),
                )
            },
        );
        Self { service }
    }

    /// Run a request through the chain.
    pub async fn execute(&self, request: execution::Request) -> execution::ServiceResult {
        self.service.clone().oneshot(request).await
    }
}

impl Service<execution::Request> for InterceptorChain {
    type Response = execution::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: execution::Request) -> Self::Future {
        self.service.call(request)
    }
}
