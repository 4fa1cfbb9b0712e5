//! Layers shared by interceptors and the pipeline.
//!
//! Layers that only make sense for one interceptor live next to that interceptor.

use std::ops::ControlFlow;
use std::sync::Arc;

use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::layer::util::Stack;
use tracing::Span;

use crate::interceptor::Interceptor;
use crate::interceptor::InterceptorLayer;
use crate::layers::instrument::InstrumentLayer;
use crate::layers::sync_checkpoint::CheckpointLayer;

pub mod instrument;
pub mod sync_checkpoint;

/// GraphQL specific additions to [`ServiceBuilder`].
#[allow(clippy::type_complexity)]
pub trait ServiceBuilderExt<L>: Sized {
    /// Answer a request without calling the inner service.
    ///
    /// `checkpoint_fn` runs synchronously before the inner service: `ControlFlow::Continue`
    /// hands the (possibly modified) request on, `ControlFlow::Break` answers with the given
    /// response.
    ///
    /// ```rust
    /// # use std::ops::ControlFlow;
    /// # use tower::ServiceBuilder;
    /// # use graphql_transport::services::execution;
    /// # use graphql_transport::layers::ServiceBuilderExt;
    /// # fn test(service: execution::BoxCloneService) {
    /// let _ = ServiceBuilder::new()
    ///     .checkpoint(|request: execution::Request| {
    ///         if request.body.operation_name.is_some() {
    ///             return Ok(ControlFlow::Continue(request));
    ///         }
    ///         Ok(ControlFlow::Break(
    ///             execution::Response::error_builder()
    ///                 .id(request.id())
    ///                 .error(
    ///                     graphql_transport::graphql::Error::builder()
    ///                         .message("anonymous operations are not allowed")
    ///                         .build(),
    ///                 )
    ///                 .context(request.context)
    ///                 .build(),
    ///         ))
    ///     })
    ///     .service(service);
    /// # }
    /// ```
    fn checkpoint<S, Request>(
        self,
        checkpoint_fn: impl Fn(
            Request,
        ) -> Result<
            ControlFlow<<S as Service<Request>>::Response, Request>,
            <S as Service<Request>>::Error,
        > + Send
        + Sync
        + 'static,
    ) -> ServiceBuilder<Stack<CheckpointLayer<S, Request>, L>>
    where
        S: Service<Request> + Send + 'static,
        Request: Send + 'static,
        S::Future: Send,
        S::Response: Send + 'static,
        S::Error: Into<BoxError> + Send + 'static,
    {
        self.layer(CheckpointLayer::new(checkpoint_fn))
    }

    /// Run each call inside the span `span_fn` builds from the request.
    ///
    /// The request type of `span_fn` must be annotated for the closure to be accepted.
    fn instrument<F, Request>(self, span_fn: F) -> ServiceBuilder<Stack<InstrumentLayer<F>, L>>
    where
        F: Fn(&Request) -> Span,
    {
        self.layer(InstrumentLayer::new(span_fn))
    }

    /// Wrap the rest of the stack with an [`Interceptor`].
    fn interceptor(
        self,
        interceptor: Arc<dyn Interceptor>,
    ) -> ServiceBuilder<Stack<InterceptorLayer, L>> {
        self.layer(InterceptorLayer::new(interceptor))
    }

    /// Add a layer. Lets the provided methods above be written once for every implementor.
    fn layer<T>(self, layer: T) -> ServiceBuilder<Stack<T, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn layer<T>(self, layer: T) -> ServiceBuilder<Stack<T, L>> {
        ServiceBuilder::layer(self, layer)
    }
}
