//! The WebSocket handshake, and the bridge between axum sockets and sessions.

use std::future::ready;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::extract::FromRequestParts;
use axum::extract::Request;
use axum::extract::State;
use axum::extract::ws;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::response::Response;
use futures::SinkExt;
use futures::StreamExt;
use tower::BoxError;

use crate::pipeline::Pipeline;
use crate::protocols::websocket::CloseFrame;
use crate::protocols::websocket::Frame;
use crate::protocols::websocket::GRAPHQL_TRANSPORT_WS_PROTOCOL;
use crate::protocols::websocket::SessionInfo;
use crate::protocols::websocket::WebSocketSession;

pub(super) async fn handle_upgrade(State(pipeline): State<Pipeline>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &pipeline).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(%rejection, "invalid websocket handshake");
            return rejection.into_response();
        }
    };

    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let info = SessionInfo::builder()
        .uri(parts.uri)
        .headers(parts.headers)
        .and_remote_addr(remote_addr)
        .build();
    let session = pipeline.websocket_session(info);

    upgrade
        .protocols([GRAPHQL_TRANSPORT_WS_PROTOCOL])
        .on_upgrade(move |socket| run(session, socket))
}

async fn run(session: WebSocketSession, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let incoming = stream.filter_map(|message| {
        ready(match message {
            Ok(message) => from_message(message).map(Ok),
            Err(error) => Some(Err(BoxError::from(error))),
        })
    });
    let outgoing = sink.with(|frame: Frame| ready(Ok::<_, axum::Error>(into_message(frame))));

    let code = session.run(incoming, outgoing).await;
    tracing::debug!(code = code.as_u16(), "websocket connection ended");
}

/// Ping and pong frames are answered by axum.
fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Close(close) => Some(Frame::Close(close.map(|close| CloseFrame {
            code: close.code,
            reason: close.reason.as_str().to_owned(),
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Close(close) => Message::Close(close.map(|close| ws::CloseFrame {
            code: close.code,
            reason: close.reason.into(),
        })),
    }
}
