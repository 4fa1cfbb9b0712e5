//! Ensure that an [`execution::Request`] contains a query.
//!
//! See [`Layer`] and [`Service`] for more details.
//!
//! If the request does not contain a query, then the request is rejected before it reaches the
//! engine.

use std::ops::ControlFlow;

use http::StatusCode;
use tower::BoxError;
use tower::Layer;
use tower::Service;

use crate::error::GRAPHQL_VALIDATION_FAILED;
use crate::graphql;
use crate::graphql::ErrorClassification;
use crate::layers::sync_checkpoint::CheckpointService;
use crate::services::execution;

pub(crate) const MISSING_QUERY_MESSAGE: &str = "Must provide query string.";

#[derive(Default)]
pub(crate) struct EnsureQueryPresence {}

impl<S> Layer<S> for EnsureQueryPresence
where
    S: Service<execution::Request, Response = execution::Response> + Send + 'static,
    <S as Service<execution::Request>>::Future: Send + 'static,
    <S as Service<execution::Request>>::Error: Into<BoxError> + Send + 'static,
{
    type Service = CheckpointService<S, execution::Request>;

    fn layer(&self, service: S) -> Self::Service {
        CheckpointService::new(
            |req: execution::Request| {
                if req.body.has_document() {
                    return Ok(ControlFlow::Continue(req));
                }
                tracing::debug!(id = req.id(), "rejecting request without a query");
                // request headers are not copied to the response, they may hold credentials
                let res = execution::Response::error_builder()
                    .id(req.id())
                    .error(
                        graphql::Error::builder()
                            .message(MISSING_QUERY_MESSAGE)
                            .extension_code(GRAPHQL_VALIDATION_FAILED)
                            .classification(ErrorClassification::BadRequest)
                            .build(),
                    )
                    .status_code(StatusCode::BAD_REQUEST)
                    .context(req.context)
                    .build();
                Ok(ControlFlow::Break(res))
            },
            service,
        )
    }
}
