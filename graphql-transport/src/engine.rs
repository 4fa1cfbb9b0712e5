//! The contract with the GraphQL engine.
//!
//! Parsing, validation and resolver invocation are the engine's business. This crate only hands
//! it an [`ExecutionInput`] and turns the [`ExecutionOutcome`] into a response.

use std::future::Future;

use futures::Stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use tower::BoxError;

use crate::Context;
use crate::graphql;
use crate::json_ext::Object;
use crate::services::transport::TransportInfo;

/// Everything the engine needs to execute one operation.
#[derive(Clone, Debug)]
pub struct ExecutionInput {
    /// The request id, unique within its scope.
    pub execution_id: String,
    pub document: String,
    pub operation_name: Option<String>,
    pub variables: Object,
    pub extensions: Object,
    /// Request-scoped values for resolvers.
    pub context: Context,
    pub transport: TransportInfo,
}

/// What the engine produced: a value available now, a value available later, or a stream of
/// subscription events.
pub enum ExecutionOutcome {
    Value(graphql::Response),
    Deferred(BoxFuture<'static, graphql::Response>),
    Stream(graphql::SubscriptionStream),
}

impl ExecutionOutcome {
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = graphql::Response> + Send + 'static,
    {
        ExecutionOutcome::Deferred(Box::pin(future))
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<graphql::Response, Vec<graphql::Error>>> + Send + 'static,
    {
        ExecutionOutcome::Stream(stream.boxed())
    }
}

impl From<graphql::Response> for ExecutionOutcome {
    fn from(response: graphql::Response) -> Self {
        ExecutionOutcome::Value(response)
    }
}

/// A GraphQL engine.
///
/// GraphQL errors (validation failures, resolver errors) belong in the returned response. An
/// `Err` means the engine could not execute at all and is reported as an internal error.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait GraphQlEngine: Send + Sync + 'static {
    async fn execute(&self, input: ExecutionInput) -> Result<ExecutionOutcome, BoxError>;
}

/// An engine backed by an async function.
pub fn engine_fn<F, Fut>(f: F) -> EngineFn<F>
where
    F: Fn(ExecutionInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ExecutionOutcome, BoxError>> + Send + 'static,
{
    EngineFn { f }
}

/// See [`engine_fn`].
#[derive(Clone)]
pub struct EngineFn<F> {
    f: F,
}

#[async_trait::async_trait]
impl<F, Fut> GraphQlEngine for EngineFn<F>
where
    F: Fn(ExecutionInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ExecutionOutcome, BoxError>> + Send + 'static,
{
    async fn execute(&self, input: ExecutionInput) -> Result<ExecutionOutcome, BoxError> {
        (self.f)(input).await
    }
}
