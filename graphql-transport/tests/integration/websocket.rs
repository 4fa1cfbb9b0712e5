use futures::SinkExt;
use futures::StreamExt;
use http::HeaderValue;
use http::header::AUTHORIZATION;
use http::header::SEC_WEBSOCKET_PROTOCOL;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tower::BoxError;

use crate::integration::TestServer;
use crate::integration::common::TIMEOUT;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(server: &TestServer, authorization: Option<&'static str>) -> Socket {
    let mut request = server.ws_url().into_client_request().unwrap();
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static("graphql-transport-ws"),
    );
    if let Some(authorization) = authorization {
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static(authorization));
    }
    let (socket, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
        "graphql-transport-ws"
    );
    socket
}

async fn send(socket: &mut Socket, message: Value) {
    socket.send(Message::text(message.to_string())).await.unwrap();
}

/// The next protocol message, keep-alive pings skipped.
async fn receive(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(TIMEOUT, socket.next())
            .await
            .expect("no message from the server")
            .expect("connection closed")
            .unwrap();
        match message {
            Message::Text(text) => {
                let message: Value = serde_json::from_str(text.as_str()).unwrap();
                if message["type"] != "ping" {
                    return message;
                }
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// The code of the close frame ending the connection.
async fn closed_with(socket: &mut Socket) -> u16 {
    loop {
        let message = tokio::time::timeout(TIMEOUT, socket.next())
            .await
            .expect("no message from the server")
            .expect("connection closed without a close frame")
            .unwrap();
        if let Message::Close(frame) = message {
            return frame.map(|frame| u16::from(frame.code)).unwrap_or(1005);
        }
    }
}

async fn init(socket: &mut Socket, payload: Value) {
    send(socket, json!({"type": "connection_init", "payload": payload})).await;
    assert_eq!(receive(socket).await, json!({"type": "connection_ack"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn queries_and_subscriptions_share_a_connection() -> Result<(), BoxError> {
    let server = TestServer::start().await;
    let mut socket = connect(&server, None).await;
    init(&mut socket, json!({})).await;

    send(
        &mut socket,
        json!({
            "type": "subscribe",
            "id": "1",
            "payload": {
                "query": "query Add($a: Int, $b: Int) { add(a: $a, b: $b) }",
                "variables": {"a": 2, "b": 3}
            }
        }),
    )
    .await;
    assert_eq!(
        receive(&mut socket).await,
        json!({"type": "next", "id": "1", "payload": {"data": {"add": 5}}})
    );
    assert_eq!(
        receive(&mut socket).await,
        json!({"type": "complete", "id": "1"})
    );

    send(
        &mut socket,
        json!({"type": "subscribe", "id": "2", "payload": {"query": "subscription { count }"}}),
    )
    .await;
    for count in 1..=3 {
        assert_eq!(
            receive(&mut socket).await,
            json!({"type": "next", "id": "2", "payload": {"data": {"count": count}}})
        );
    }
    assert_eq!(
        receive(&mut socket).await,
        json!({"type": "complete", "id": "2"})
    );

    send(&mut socket, json!({"type": "ping"})).await;
    assert_eq!(receive(&mut socket).await, json!({"type": "pong"}));

    socket.close(None).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_operations_are_reported_per_id() -> Result<(), BoxError> {
    let server = TestServer::start().await;
    let mut socket = connect(&server, None).await;
    init(&mut socket, json!({})).await;

    send(
        &mut socket,
        json!({"type": "subscribe", "id": "1", "payload": {"query": ""}}),
    )
    .await;
    let error = receive(&mut socket).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["id"], "1");
    assert_eq!(
        error["payload"][0]["extensions"]["code"],
        "INVALID_GRAPHQL_REQUEST"
    );

    // the connection is still usable
    send(
        &mut socket,
        json!({"type": "subscribe", "id": "1", "payload": {"query": "{ whoami }"}}),
    )
    .await;
    assert_eq!(
        receive(&mut socket).await,
        json!({"type": "next", "id": "1", "payload": {"data": {"whoami": null}}})
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_init_authenticates_every_operation() -> Result<(), BoxError> {
    let server = TestServer::start().await;
    let mut socket = connect(&server, None).await;
    init(&mut socket, json!({"Authorization": "Bearer valid"})).await;

    for id in ["1", "2"] {
        send(
            &mut socket,
            json!({"type": "subscribe", "id": id, "payload": {"query": "{ whoami }"}}),
        )
        .await;
        assert_eq!(
            receive(&mut socket).await,
            json!({"type": "next", "id": id, "payload": {"data": {"whoami": "alice"}}})
        );
        assert_eq!(
            receive(&mut socket).await,
            json!({"type": "complete", "id": id})
        );
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn handshake_headers_authenticate_operations() -> Result<(), BoxError> {
    let server = TestServer::start().await;
    let mut socket = connect(&server, Some("Bearer valid")).await;
    init(&mut socket, json!({})).await;

    send(
        &mut socket,
        json!({"type": "subscribe", "id": "1", "payload": {"query": "{ whoami }"}}),
    )
    .await;
    assert_eq!(
        receive(&mut socket).await,
        json!({"type": "next", "id": "1", "payload": {"data": {"whoami": "alice"}}})
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_credentials_close_the_connection() -> Result<(), BoxError> {
    let server = TestServer::start().await;
    let mut socket = connect(&server, None).await;

    send(
        &mut socket,
        json!({"type": "connection_init", "payload": {"Authorization": "Bearer forged"}}),
    )
    .await;
    assert_eq!(closed_with(&mut socket).await, 4403);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn operations_require_an_acknowledged_connection() -> Result<(), BoxError> {
    let server = TestServer::start().await;
    let mut socket = connect(&server, None).await;

    send(
        &mut socket,
        json!({"type": "subscribe", "id": "1", "payload": {"query": "{ whoami }"}}),
    )
    .await;
    assert_eq!(closed_with(&mut socket).await, 4401);
    Ok(())
}
