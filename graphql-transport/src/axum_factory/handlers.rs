//! GraphQL over HTTP.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use bytes::Bytes;
use http::HeaderName;
use http::HeaderValue;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use serde::Serialize;
use tower::ServiceExt;

use super::content_negotiation::APPLICATION_JSON_HEADER_VALUE;
use super::content_negotiation::ClientRequestAccepts;
use super::content_negotiation::GRAPHQL_JSON_RESPONSE_HEADER_VALUE;
use super::content_negotiation::RequestContentType;
use super::content_negotiation::parse_accept_header;
use super::content_negotiation::parse_content_type;
use crate::Context;
use crate::configuration;
use crate::error::RequestError;
use crate::error::SUBSCRIPTION_NOT_SUPPORTED;
use crate::error::internal_error;
use crate::graphql;
use crate::graphql::ErrorClassification;
use crate::pipeline::Pipeline;
use crate::propagation::capture_all;
use crate::protocols::multipart::MULTIPART_SUBSCRIPTION_CONTENT_TYPE;
use crate::protocols::multipart::Multipart;
use crate::protocols::sse;
use crate::services::ExecutionResult;
use crate::services::execution;
use crate::services::transport::TransportInfo;

const INVALID_ACCEPT_HEADER: &str = "INVALID_ACCEPT_HEADER";

pub(super) async fn handle_post(
    State(pipeline): State<Pipeline>,
    parts: Parts,
    body: Bytes,
) -> Response {
    let accepts = parse_accept_header(&parts.headers);
    if !accepts.is_acceptable() {
        return invalid_accept_header_response();
    }

    let graphql_request = match parse_content_type(&parts.headers).and_then(|content_type| {
        match content_type {
            RequestContentType::Json => graphql::Request::from_bytes(&body),
            RequestContentType::GraphQl => graphql::Request::from_document(&body),
        }
    }) {
        Ok(graphql_request) => graphql_request,
        Err(error) => {
            tracing::debug!(%error, "invalid graphql request");
            let status = match error {
                RequestError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                _ => StatusCode::BAD_REQUEST,
            };
            return error_response(status, vec![error.to_graphql_error()]);
        }
    };

    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let request = execution::Request::builder()
        .id(uuid::Uuid::new_v4().to_string())
        .body(graphql_request)
        .context(Context::new())
        .transport(TransportInfo::http(parts.uri, parts.headers, remote_addr))
        .build();
    capture_all(pipeline.propagators(), &request.context);

    match pipeline.service().oneshot(request).await {
        Ok(response) => into_http_response(response, accepts, &pipeline.configuration().http),
        Err(error) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![internal_error(&error)],
        ),
    }
}

fn into_http_response(
    response: execution::Response,
    accepts: ClientRequestAccepts,
    configuration: &configuration::Http,
) -> Response {
    let execution::Response {
        result,
        headers,
        status_code,
        ..
    } = response;
    let wants_sse = configuration.sse.enabled && accepts.event_stream;

    let mut http_response = match result {
        ExecutionResult::Single(response) if accepts.single_response() => json_response(
            status_code.unwrap_or(StatusCode::OK),
            accepts.single_response_content_type(),
            &response,
        ),
        result @ ExecutionResult::Single(_) if wants_sse => {
            sse::into_response(result, configuration.sse.keep_alive)
        }
        ExecutionResult::Single(_) => {
            tracing::debug!("no accepted format can carry a single response");
            invalid_accept_header_response()
        }
        result @ ExecutionResult::Stream(_) if wants_sse => {
            sse::into_response(result, configuration.sse.keep_alive)
        }
        ExecutionResult::Stream(stream)
            if configuration.multipart && accepts.multipart_subscription =>
        {
            (
                StatusCode::OK,
                [
                    (
                        CONTENT_TYPE,
                        HeaderValue::from_static(MULTIPART_SUBSCRIPTION_CONTENT_TYPE),
                    ),
                    // disables buffering in nginx
                    (
                        HeaderName::from_static("x-accel-buffering"),
                        HeaderValue::from_static("no"),
                    ),
                ],
                Body::from_stream(Multipart::new(stream)),
            )
                .into_response()
        }
        ExecutionResult::Stream(_) => {
            tracing::debug!("subscription requested without a streaming accept header");
            error_response(
                StatusCode::NOT_ACCEPTABLE,
                vec![
                    graphql::Error::builder()
                        .message(
                            "subscriptions need an 'accept' header allowing \
                             'text/event-stream' or 'multipart/mixed'",
                        )
                        .extension_code(SUBSCRIPTION_NOT_SUPPORTED)
                        .classification(ErrorClassification::BadRequest)
                        .build(),
                ],
            )
        }
    };
    http_response.headers_mut().extend(headers);
    http_response
}

fn json_response(status: StatusCode, content_type: &'static str, body: &impl Serialize) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(CONTENT_TYPE, HeaderValue::from_static(content_type))],
            Body::from(bytes),
        )
            .into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            internal_error(&error).message,
        )
            .into_response(),
    }
}

fn error_response(status: StatusCode, errors: Vec<graphql::Error>) -> Response {
    json_response(
        status,
        APPLICATION_JSON_HEADER_VALUE,
        &graphql::Response::builder().errors(errors).build(),
    )
}

fn invalid_accept_header_response() -> Response {
    let message = format!(
        r#"'accept' header must be one of: "*/*", {:?}, {:?}, "text/event-stream" or "multipart/mixed""#,
        APPLICATION_JSON_HEADER_VALUE,
        GRAPHQL_JSON_RESPONSE_HEADER_VALUE,
    );
    error_response(
        StatusCode::NOT_ACCEPTABLE,
        vec![
            graphql::Error::builder()
                .message(message)
                .extension_code(INVALID_ACCEPT_HEADER)
                .build(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use http::Method;
    use http::Request;
    use http::header::ACCEPT;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use serde_json_bytes::json as bjson;
    use tower::BoxError;

    use super::*;
    use crate::Configuration;
    use crate::engine::ExecutionOutcome;
    use crate::engine::engine_fn;
    use crate::error::GRAPHQL_VALIDATION_FAILED;
    use crate::error::INTERNAL_SERVER_ERROR;
    use crate::error::INVALID_GRAPHQL_REQUEST;
    use crate::interceptor::interceptor_fn;

    fn router() -> axum::Router {
        router_with(Configuration::default())
    }

    fn router_with(configuration: Configuration) -> axum::Router {
        let pipeline = Pipeline::builder()
            .engine(engine_fn(|input| async move {
                let outcome = match input.document.as_str() {
                    "subscription { count }" => ExecutionOutcome::stream(stream::iter(vec![
                        Ok(graphql::Response::builder().data(bjson!({"count": 1})).build()),
                        Ok(graphql::Response::builder().data(bjson!({"count": 2})).build()),
                    ])),
                    "{ broken }" => return Err(BoxError::from("engine exploded")),
                    "{ invalid }" => ExecutionOutcome::Value(
                        graphql::Response::builder()
                            .error(
                                graphql::Error::builder()
                                    .message("Cannot query field \"invalid\" on type \"Query\".")
                                    .build(),
                            )
                            .build(),
                    ),
                    _ => ExecutionOutcome::Value(
                        graphql::Response::builder()
                            .data(bjson!({
                                "hello": "world",
                                "operationName": input.operation_name,
                                "variables": input.variables,
                            }))
                            .build(),
                    ),
                };
                Ok(outcome)
            }))
            .interceptor(interceptor_fn(|request, next| async move {
                let mut response = next.run(request).await?;
                response
                    .headers
                    .insert("x-intercepted", HeaderValue::from_static("true"));
                Ok::<_, BoxError>(response)
            }))
            .configuration(configuration)
            .build()
            .unwrap();
        pipeline.router()
    }

    async fn send(request: Request<Body>) -> (StatusCode, http::HeaderMap, Bytes) {
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    fn post(content_type: &str, accept: Option<&str>, body: impl Into<Body>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/graphql")
            .header(CONTENT_TYPE, content_type);
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        builder.body(body.into()).unwrap()
    }

    fn to_json(body: &Bytes) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn json_request() {
        let (status, headers, body) = send(post(
            "application/json",
            None,
            json!({
                "query": "query Q($x: Int) { hello }",
                "operationName": "Q",
                "variables": {"x": 1}
            })
            .to_string(),
        ))
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-intercepted"], "true");
        assert_eq!(
            to_json(&body),
            json!({"data": {"hello": "world", "operationName": "Q", "variables": {"x": 1}}})
        );
    }

    #[tokio::test]
    async fn graphql_response_json_is_used_when_accepted() {
        let (status, headers, _) = send(post(
            "application/json",
            Some("application/graphql-response+json"),
            r#"{"query": "{ hello }"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], GRAPHQL_JSON_RESPONSE_HEADER_VALUE);
    }

    #[tokio::test]
    async fn graphql_document_request() {
        let (status, _, body) = send(post("application/graphql", None, "{ hello }")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(to_json(&body)["data"]["hello"], "world");
    }

    #[tokio::test]
    async fn graphql_errors_are_ok() {
        let (status, _, body) = send(post(
            "application/json",
            None,
            r#"{"query": "{ invalid }"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            to_json(&body),
            json!({"errors": [{"message": "Cannot query field \"invalid\" on type \"Query\"."}]})
        );
    }

    #[tokio::test]
    async fn malformed_requests_are_bad_requests() {
        for body in [
            "not json",
            "[1, 2]",
            r#"{"query": 1}"#,
            r#"{"query": "{ a }", "variables": "x"}"#,
        ] {
            let (status, _, response) = send(post("application/json", None, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(
                to_json(&response)["errors"][0]["extensions"]["code"],
                INVALID_GRAPHQL_REQUEST
            );
        }
    }

    #[tokio::test]
    async fn missing_query_is_a_bad_request() {
        let (status, _, body) = send(post("application/json", None, r#"{"query": "  "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            to_json(&body)["errors"][0]["message"],
            "Must provide query string."
        );

        let (status, _, body) = send(post("application/graphql", None, "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            to_json(&body)["errors"][0]["message"],
            "Must provide query string."
        );
        // blank documents never reach the chain
        assert_ne!(
            to_json(&body)["errors"][0]["extensions"]["code"],
            GRAPHQL_VALIDATION_FAILED
        );
    }

    #[tokio::test]
    async fn unsupported_content_type() {
        let (status, _, _) = send(post("text/plain", None, "{ hello }")).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn unacceptable_accept_header() {
        let (status, _, body) = send(post(
            "application/json",
            Some("text/html"),
            r#"{"query": "{ hello }"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            to_json(&body)["errors"][0]["extensions"]["code"],
            INVALID_ACCEPT_HEADER
        );
    }

    #[tokio::test]
    async fn engine_failures_are_internal_errors() {
        let (status, _, body) = send(post(
            "application/json",
            None,
            r#"{"query": "{ broken }"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_json(&body);
        assert_eq!(body["errors"][0]["extensions"]["code"], INTERNAL_SERVER_ERROR);
        // the cause is logged, not sent
        assert!(!body.to_string().contains("exploded"));
    }

    #[tokio::test]
    async fn subscriptions_need_a_streaming_accept_header() {
        let (status, _, body) = send(post(
            "application/json",
            Some("application/json"),
            r#"{"query": "subscription { count }"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            to_json(&body)["errors"][0]["extensions"]["code"],
            SUBSCRIPTION_NOT_SUPPORTED
        );
    }

    #[tokio::test]
    async fn subscriptions_over_server_sent_events() {
        let (status, headers, body) = send(post(
            "application/json",
            Some("text/event-stream"),
            r#"{"query": "subscription { count }"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "text/event-stream");
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(body.matches("event: next").count(), 2);
        assert!(body.contains(r#"{"data":{"count":2}}"#));
        assert!(body.contains("event: complete"));
    }

    #[tokio::test]
    async fn queries_over_server_sent_events_are_not_supported() {
        let (status, _, body) = send(post(
            "application/json",
            Some("text/event-stream"),
            r#"{"query": "{ hello }"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("event: error"));
        assert!(body.contains("OPERATION_NOT_SUPPORTED"));
    }

    #[tokio::test]
    async fn event_stream_only_clients_need_server_sent_events() {
        let router = router_with(
            Configuration::builder()
                .http(
                    configuration::Http::builder()
                        .sse(configuration::Sse::builder().enabled(false).build())
                        .build(),
                )
                .build(),
        );
        let response = router
            .oneshot(post(
                "application/json",
                Some("text/event-stream"),
                r#"{"query": "{ hello }"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            APPLICATION_JSON_HEADER_VALUE
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            to_json(&body)["errors"][0]["extensions"]["code"],
            INVALID_ACCEPT_HEADER
        );
    }

    #[tokio::test]
    async fn subscriptions_over_multipart() {
        let (status, headers, body) = send(post(
            "application/json",
            Some("multipart/mixed;subscriptionSpec=1.0"),
            r#"{"query": "subscription { count }"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], MULTIPART_SUBSCRIPTION_CONTENT_TYPE);
        assert_eq!(headers["x-accel-buffering"], "no");
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(r#"{"payload":{"data":{"count":1}}}"#));
        assert!(body.contains(r#"{"payload":{"data":{"count":2}}}"#));
        assert!(body.ends_with("\r\n--graphql--\r\n"));
    }

    #[tokio::test]
    async fn remote_address_is_forwarded() {
        let addr: SocketAddr = "10.0.0.1:4242".parse().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = parking_lot::Mutex::new(Some(tx));
        let pipeline = Pipeline::builder()
            .engine(engine_fn(move |input| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(input.transport.remote_addr);
                }
                async { Ok(ExecutionOutcome::Value(graphql::Response::default())) }
            }))
            .build()
            .unwrap();

        let mut request = post("application/json", None, r#"{"query": "{ a }"}"#);
        request.extensions_mut().insert(ConnectInfo(addr));
        let response = pipeline.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.await.unwrap(), Some(addr));
    }
}
