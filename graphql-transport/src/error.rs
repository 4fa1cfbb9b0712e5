//! Error types and error codes.

use displaydoc::Display;
use thiserror::Error;

use crate::graphql;
use crate::graphql::ErrorClassification;

/// Error code of requests rejected before execution.
pub const INVALID_GRAPHQL_REQUEST: &str = "INVALID_GRAPHQL_REQUEST";
/// Error code of requests without a document.
pub const GRAPHQL_VALIDATION_FAILED: &str = "GRAPHQL_VALIDATION_FAILED";
/// Error code of infrastructure failures.
pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
/// Error code of subscriptions sent to a transport that cannot stream.
pub const SUBSCRIPTION_NOT_SUPPORTED: &str = "SUBSCRIPTION_NOT_SUPPORTED";
/// Error code of non subscription operations sent to a streaming-only transport.
pub const OPERATION_NOT_SUPPORTED: &str = "OPERATION_NOT_SUPPORTED";
/// Error code of requests refused by authentication.
pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";

/// Input validation errors raised while reading a GraphQL request off the wire.
#[derive(Clone, Debug, Error, Display, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestError {
    /// request body is not valid JSON: {0}
    MalformedJson(String),
    /// request body must be a JSON object, got {0}
    NotAnObject(&'static str),
    /// Must provide query string.
    MissingQuery,
    /// the 'query' field must be a string
    InvalidQuery,
    /// the 'operationName' field must be a string or null
    InvalidOperationName,
    /// the '{0}' field must be a map or null
    InvalidMap(&'static str),
    /// unsupported content type: {0}
    UnsupportedContentType(String),
}

impl RequestError {
    /// The GraphQL error reported to clients.
    pub fn to_graphql_error(&self) -> graphql::Error {
        graphql::Error::builder()
            .message(self.to_string())
            .extension_code(INVALID_GRAPHQL_REQUEST)
            .classification(ErrorClassification::BadRequest)
            .build()
    }
}

/// An error that surfaced outside of GraphQL execution, reported as a single GraphQL error.
pub(crate) fn internal_error(error: &dyn std::fmt::Display) -> graphql::Error {
    tracing::error!(%error, "graphql execution failed");
    graphql::Error::builder()
        .message("internal server error")
        .extension_code(INTERNAL_SERVER_ERROR)
        .classification(ErrorClassification::InternalError)
        .build()
}
