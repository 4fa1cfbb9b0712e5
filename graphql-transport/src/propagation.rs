//! Carrying ambient values across the engine boundary.
//!
//! Resolvers may run on another task or worker than the one that accepted the request, so
//! values a transport stored in task-local storage would be lost on the way. A
//! [`ContextPropagator`] captures such values into the request [`Context`] at the transport
//! boundary, and restores them around the engine execution and the polling of subscription
//! streams.

use std::pin::Pin;
use std::task::Poll;

use futures::Stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use pin_project_lite::pin_project;
use tokio::task::LocalKey;
use tower::BoxError;

use crate::Context;
use crate::graphql;
use crate::services::execution::ExecutionResult;

/// The engine execution, before its result flows back up the interceptor chain.
pub type PendingExecution = BoxFuture<'static, Result<ExecutionResult, BoxError>>;

/// Captures ambient values when a request enters and restores them where resolvers run.
pub trait ContextPropagator: Send + Sync + 'static {
    /// Called by transports before the request enters the interceptor chain.
    fn capture(&self, context: &Context);

    /// Wrap the execution so the captured values are visible while it runs.
    fn restore(&self, context: &Context, execution: PendingExecution) -> PendingExecution;

    /// Wrap a subscription stream so the captured values are visible while it is polled.
    fn restore_stream(
        &self,
        _context: &Context,
        stream: graphql::SubscriptionStream,
    ) -> graphql::SubscriptionStream {
        stream
    }
}

/// The value captured by a [`TaskLocalPropagator`].
#[derive(Clone)]
struct Captured<T>(T);

/// Propagates a [`tokio::task_local!`] value.
pub struct TaskLocalPropagator<T: 'static> {
    key: &'static LocalKey<T>,
}

impl<T> TaskLocalPropagator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(key: &'static LocalKey<T>) -> Self {
        Self { key }
    }

    fn captured(&self, context: &Context) -> Option<T> {
        context
            .extensions()
            .with_lock(|lock| lock.get::<Captured<T>>().map(|captured| captured.0.clone()))
    }
}

impl<T> ContextPropagator for TaskLocalPropagator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn capture(&self, context: &Context) {
        if let Ok(value) = self.key.try_with(|value| value.clone()) {
            context
                .extensions()
                .with_lock(|mut lock| lock.insert(Captured(value)));
        }
    }

    fn restore(&self, context: &Context, execution: PendingExecution) -> PendingExecution {
        match self.captured(context) {
            Some(value) => Box::pin(self.key.scope(value, execution)),
            None => execution,
        }
    }

    fn restore_stream(
        &self,
        context: &Context,
        stream: graphql::SubscriptionStream,
    ) -> graphql::SubscriptionStream {
        match self.captured(context) {
            Some(value) => TaskLocalStream {
                key: self.key,
                value,
                stream,
            }
            .boxed(),
            None => stream,
        }
    }
}

pin_project! {
    struct TaskLocalStream<T: 'static, S> {
        key: &'static LocalKey<T>,
        value: T,
        #[pin]
        stream: S,
    }
}

impl<T, S> Stream for TaskLocalStream<T, S>
where
    T: Clone + 'static,
    S: Stream,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let key: &'static LocalKey<T> = *this.key;
        let value = this.value.clone();
        let stream = this.stream;
        key.sync_scope(value, move || stream.poll_next(cx))
    }
}

/// Run every propagator's capture step.
pub(crate) fn capture_all(
    propagators: &[std::sync::Arc<dyn ContextPropagator>],
    context: &Context,
) {
    for propagator in propagators {
        propagator.capture(context);
    }
}
