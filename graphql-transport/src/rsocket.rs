//! GraphQL over RSocket payloads.
//!
//! The RSocket wire codec and route metadata are handled by the RSocket implementation: a
//! [`RSocketHandler`] receives the decoded payload map of a request, and answers with response
//! maps. Request-response interactions carry queries and mutations, request-stream interactions
//! carry subscriptions.

use std::future::ready;
use std::sync::Arc;

use displaydoc::Display;
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tower::ServiceExt;

use crate::Context;
use crate::error::INTERNAL_SERVER_ERROR;
use crate::error::OPERATION_NOT_SUPPORTED;
use crate::error::RequestError;
use crate::error::SUBSCRIPTION_NOT_SUPPORTED;
use crate::graphql;
use crate::graphql::ErrorClassification;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::propagation::ContextPropagator;
use crate::propagation::capture_all;
use crate::services::ExecutionResult;
use crate::services::execution;
use crate::services::transport::TransportInfo;
use crate::services::transport::TransportKind;

/// Error signal of an RSocket interaction.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum RSocketError {
    /// invalid request: {0}
    InvalidRequest(#[from] RequestError),
    /// subscriptions must be sent as request-stream
    SubscriptionNotSupported,
    /// only subscriptions can be sent as request-stream
    OperationNotSupported,
    /// the operation was rejected
    Rejected { errors: Vec<graphql::Error> },
    /// internal server error
    Internal,
}

impl RSocketError {
    /// The GraphQL errors describing this error.
    pub fn to_graphql_errors(&self) -> Vec<graphql::Error> {
        match self {
            RSocketError::InvalidRequest(error) => vec![error.to_graphql_error()],
            RSocketError::SubscriptionNotSupported => vec![
                graphql::Error::builder()
                    .message(self.to_string())
                    .extension_code(SUBSCRIPTION_NOT_SUPPORTED)
                    .classification(ErrorClassification::BadRequest)
                    .build(),
            ],
            RSocketError::OperationNotSupported => vec![
                graphql::Error::builder()
                    .message(self.to_string())
                    .extension_code(OPERATION_NOT_SUPPORTED)
                    .classification(ErrorClassification::BadRequest)
                    .build(),
            ],
            RSocketError::Rejected { errors } => errors.clone(),
            RSocketError::Internal => vec![
                graphql::Error::builder()
                    .message(self.to_string())
                    .extension_code(INTERNAL_SERVER_ERROR)
                    .classification(ErrorClassification::InternalError)
                    .build(),
            ],
        }
    }

    /// The error list as JSON, for the data of the error frame.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json_bytes::to_value(self.to_graphql_errors())
    }
}

fn to_payload(response: &graphql::Response) -> Result<Object, RSocketError> {
    response.to_object().map_err(|error| {
        tracing::error!(%error, "cannot serialize graphql response");
        RSocketError::Internal
    })
}

/// Handles GraphQL requests arriving over RSocket.
#[derive(Clone)]
pub struct RSocketHandler {
    service: execution::BoxCloneService,
    propagators: Arc<[Arc<dyn ContextPropagator>]>,
}

impl RSocketHandler {
    pub(crate) fn new(
        service: execution::BoxCloneService,
        propagators: Arc<[Arc<dyn ContextPropagator>]>,
    ) -> Self {
        Self {
            service,
            propagators,
        }
    }

    /// Request-response: execute a query or a mutation.
    ///
    /// GraphQL errors are part of the returned map. Subscriptions are refused.
    pub async fn handle(&self, payload: Object) -> Result<Object, RSocketError> {
        match self.execute(payload).await? {
            ExecutionResult::Single(response) => to_payload(&response),
            ExecutionResult::Stream(_) => {
                tracing::debug!("subscription sent as request-response");
                Err(RSocketError::SubscriptionNotSupported)
            }
        }
    }

    /// Request-stream: execute a subscription.
    ///
    /// Each event is one response map. A failed subscription ends with a
    /// [`RSocketError::Rejected`] item.
    pub async fn handle_subscription(
        &self,
        payload: Object,
    ) -> Result<BoxStream<'static, Result<Object, RSocketError>>, RSocketError> {
        match self.execute(payload).await? {
            ExecutionResult::Stream(stream) => Ok(stream
                .map(|item| match item {
                    Ok(response) => to_payload(&response),
                    Err(errors) => Err(RSocketError::Rejected { errors }),
                })
                .scan(false, |failed, item| {
                    if *failed {
                        return ready(None);
                    }
                    *failed = item.is_err();
                    ready(Some(item))
                })
                .boxed()),
            ExecutionResult::Single(response) if response.is_request_error() => {
                Err(RSocketError::Rejected {
                    errors: response.errors,
                })
            }
            ExecutionResult::Single(_) => {
                tracing::debug!("query or mutation sent as request-stream");
                Err(RSocketError::OperationNotSupported)
            }
        }
    }

    async fn execute(&self, payload: Object) -> Result<ExecutionResult, RSocketError> {
        let body = graphql::Request::from_map(payload)?;
        let request = execution::Request::builder()
            .id(uuid::Uuid::new_v4().to_string())
            .body(body)
            .context(Context::new())
            .transport(TransportInfo {
                kind: TransportKind::RSocket,
                ..Default::default()
            })
            .build();
        capture_all(&self.propagators, &request.context);

        match self.service.clone().oneshot(request).await {
            Ok(response) => Ok(response.result),
            Err(error) => {
                tracing::error!(%error, "graphql execution failed");
                Err(RSocketError::Internal)
            }
        }
    }
}
