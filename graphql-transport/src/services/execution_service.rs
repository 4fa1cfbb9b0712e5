//! Implements the execution facade: hands requests to the engine and shapes its outcome into an
//! [`execution::Response`].

use std::sync::Arc;
use std::task::Poll;

use futures::future::BoxFuture;
use tower::BoxError;
use tower::Service;

use crate::engine::ExecutionOutcome;
use crate::engine::GraphQlEngine;
use crate::propagation::ContextPropagator;
use crate::propagation::PendingExecution;
use crate::services::execution;
use crate::services::execution::ExecutionResult;

/// [`Service`] for the execution facade, the innermost service of the chain.
///
/// An engine failure is returned as is: there are no retries at this level.
#[derive(Clone)]
pub struct ExecutionService {
    engine: Arc<dyn GraphQlEngine>,
    propagators: Arc<[Arc<dyn ContextPropagator>]>,
}

impl ExecutionService {
    pub fn new(
        engine: Arc<dyn GraphQlEngine>,
        propagators: impl IntoIterator<Item = Arc<dyn ContextPropagator>>,
    ) -> Self {
        Self {
            engine,
            propagators: propagators.into_iter().collect(),
        }
    }
}

impl Service<execution::Request> for ExecutionService {
    type Response = execution::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: execution::Request) -> Self::Future {
        let engine = self.engine.clone();
        let propagators = self.propagators.clone();
        let input = req.to_execution_input();
        let context = req.context;
        let id = input.execution_id.clone();

        let execution: PendingExecution = Box::pin(async move {
            Ok(match engine.execute(input).await? {
                ExecutionOutcome::Value(response) => ExecutionResult::Single(response),
                ExecutionOutcome::Deferred(response) => ExecutionResult::Single(response.await),
                ExecutionOutcome::Stream(stream) => ExecutionResult::Stream(stream),
            })
        });
        let execution = propagators
            .iter()
            .fold(execution, |execution, propagator| {
                propagator.restore(&context, execution)
            });

        Box::pin(async move {
            let result = match execution.await? {
                ExecutionResult::Stream(stream) => ExecutionResult::Stream(
                    propagators.iter().fold(stream, |stream, propagator| {
                        propagator.restore_stream(&context, stream)
                    }),
                ),
                single => single,
            };
            Ok(execution::Response::from_result(id, result, context))
        })
    }
}
