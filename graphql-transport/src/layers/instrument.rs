//! Runs every call of a service inside a span built from its request.
//!
//! ```rust
//! # use tower::ServiceBuilder;
//! # use tower::Service;
//! # use tracing::info_span;
//! # use graphql_transport::layers::ServiceBuilderExt;
//! # use graphql_transport::services::execution;
//! # fn test(service: execution::BoxCloneService) {
//! let instrumented = ServiceBuilder::new()
//!     .instrument(|request: &execution::Request| {
//!         info_span!("graphql_request", graphql.id = request.id())
//!     })
//!     .service(service);
//! # }
//! ```

use std::task::Context;
use std::task::Poll;

use tower::Layer;
use tower::Service;
use tracing::Instrument;
use tracing::Span;
use tracing::instrument::Instrumented;

/// [`Layer`] for instrumentation. See [`ServiceBuilderExt::instrument()`](crate::layers::ServiceBuilderExt::instrument()).
#[derive(Clone)]
pub struct InstrumentLayer<F> {
    span_fn: F,
}

impl<F> InstrumentLayer<F> {
    pub fn new(span_fn: F) -> Self {
        Self { span_fn }
    }
}

impl<S, F: Clone> Layer<S> for InstrumentLayer<F> {
    type Service = InstrumentService<S, F>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            span_fn: self.span_fn.clone(),
        }
    }
}

/// See [`InstrumentLayer`].
#[derive(Clone)]
pub struct InstrumentService<S, F> {
    inner: S,
    span_fn: F,
}

impl<S, F, Request> Service<Request> for InstrumentService<S, F>
where
    S: Service<Request>,
    F: Fn(&Request) -> Span,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Instrumented<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let span = (self.span_fn)(&request);
        self.inner.call(request).instrument(span)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tower::BoxError;
    use tower::ServiceBuilder;
    use tower::ServiceExt;
    use tower::service_fn;
    use tracing::Span;
    use tracing::info_span;

    use crate::layers::ServiceBuilderExt;
    use crate::services::execution;

    #[tokio::test]
    async fn calls_run_inside_the_span() {
        // scoped to this thread so other tests' subscribers do not interfere
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());
        let spanned_ids = Arc::new(Mutex::new(Vec::new()));

        let service = ServiceBuilder::new()
            .instrument({
                let spanned_ids = spanned_ids.clone();
                move |req: &execution::Request| {
                    spanned_ids.lock().push(req.id().to_string());
                    info_span!("graphql_request", graphql.id = %req.id())
                }
            })
            .service(service_fn(|req: execution::Request| async move {
                assert_eq!(
                    Span::current().metadata().map(|metadata| metadata.name()),
                    Some("graphql_request")
                );
                Ok::<_, BoxError>(
                    execution::Response::builder()
                        .id(req.id())
                        .context(req.context)
                        .build(),
                )
            }));

        let response = service
            .oneshot(execution::Request::fake_builder().id("span-id").build())
            .await
            .unwrap();

        assert_eq!(response.id(), "span-id");
        assert_eq!(*spanned_ids.lock(), vec!["span-id".to_string()]);
        assert!(Span::current().is_none());
    }
}
