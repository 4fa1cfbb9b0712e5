use http::StatusCode;
use http::header::ACCEPT;
use http::header::AUTHORIZATION;
use http::header::CONTENT_TYPE;
use serde_json::Value;
use serde_json::json;
use tower::BoxError;

use crate::integration::TestServer;
use crate::integration::common::TIMEOUT;

async fn post(server: &TestServer, body: Value) -> Result<reqwest::Response, BoxError> {
    Ok(reqwest::Client::new()
        .post(server.http_url())
        .timeout(TIMEOUT)
        .json(&body)
        .send()
        .await?)
}

#[tokio::test(flavor = "multi_thread")]
async fn executes_queries_with_variables() -> Result<(), BoxError> {
    let server = TestServer::start().await;

    let response = post(
        &server,
        json!({
            "query": "query Add($a: Int, $b: Int) { add(a: $a, b: $b) }",
            "operationName": "Add",
            "variables": {"a": 2, "b": 3}
        }),
    )
    .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(response.json::<Value>().await?, json!({"data": {"add": 5}}));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn graphql_errors_are_ok_responses() -> Result<(), BoxError> {
    let server = TestServer::start().await;

    let response = post(&server, json!({"query": "{ add }"})).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.json::<Value>().await?;
    assert_eq!(body["errors"][0]["message"], "add expects two integers");
    assert_eq!(body.get("data"), None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_requests_are_rejected() -> Result<(), BoxError> {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.http_url())
        .header(CONTENT_TYPE, "application/json")
        .body("{\"query\":")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.json::<Value>().await?;
    assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_GRAPHQL_REQUEST");

    let response = post(&server, json!({"variables": {}})).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.json::<Value>().await?;
    assert_eq!(body["errors"][0]["message"], "Must provide query string.");

    let response = client
        .post(server.http_url())
        .header(CONTENT_TYPE, "text/plain")
        .body("{ whoami }")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn bearer_tokens_authenticate_requests() -> Result<(), BoxError> {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.http_url())
        .header(AUTHORIZATION, "Bearer valid")
        .json(&json!({"query": "{ whoami }"}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.json::<Value>().await?,
        json!({"data": {"whoami": "alice"}})
    );

    let response = client
        .post(server.http_url())
        .header(AUTHORIZATION, "Bearer forged")
        .json(&json!({"query": "{ whoami }"}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response.json::<Value>().await?;
    assert_eq!(body["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");

    // credentials are optional
    let response = post(&server, json!({"query": "{ whoami }"})).await?;
    assert_eq!(
        response.json::<Value>().await?,
        json!({"data": {"whoami": null}})
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn subscriptions_over_server_sent_events() -> Result<(), BoxError> {
    let server = TestServer::start().await;

    let response = reqwest::Client::new()
        .post(server.http_url())
        .timeout(TIMEOUT)
        .header(ACCEPT, "text/event-stream")
        .json(&json!({"query": "subscription { count }"}))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    let body = response.text().await?;
    assert_eq!(
        events(&body),
        vec![
            ("next", r#"{"data":{"count":1}}"#.to_string()),
            ("next", r#"{"data":{"count":2}}"#.to_string()),
            ("next", r#"{"data":{"count":3}}"#.to_string()),
            ("complete", String::new()),
        ]
    );
    Ok(())
}

/// `(event, data)` pairs of an event stream body, comments skipped.
fn events(body: &str) -> Vec<(&str, String)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = String::new();
            for (field, value) in block.lines().filter_map(|line| line.split_once(':')) {
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "event" => event = Some(value),
                    "data" => data.push_str(value),
                    _ => {}
                }
            }
            event.map(|event| (event, data))
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn subscriptions_over_multipart() -> Result<(), BoxError> {
    let server = TestServer::start().await;

    let response = reqwest::Client::new()
        .post(server.http_url())
        .timeout(TIMEOUT)
        .header(ACCEPT, "multipart/mixed;subscriptionSpec=\"1.0\"")
        .json(&json!({"query": "subscription { count }"}))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(CONTENT_TYPE)
            .unwrap()
            .to_str()?
            .starts_with("multipart/mixed")
    );
    let body = response.text().await?;
    for count in 1..=3 {
        assert!(body.contains(&format!("{{\"payload\":{{\"data\":{{\"count\":{count}}}}}}}")));
    }
    assert!(body.ends_with("--graphql--\r\n"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn subscriptions_need_a_streaming_accept_header() -> Result<(), BoxError> {
    let server = TestServer::start().await;

    let response = post(&server, json!({"query": "subscription { count }"})).await?;

    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    let body = response.json::<Value>().await?;
    assert_eq!(
        body["errors"][0]["extensions"]["code"],
        "SUBSCRIPTION_NOT_SUPPORTED"
    );
    Ok(())
}
