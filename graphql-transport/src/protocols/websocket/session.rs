//! One graphql-ws connection.
//!
//! A single loop owns the connection state and the table of running operations, so neither needs
//! locking. Every operation runs in its own task, registered under its id until it ends or is
//! cancelled. Frames from the loop and from the operations all go through one bounded channel
//! drained by a writer task: each frame is written whole, and a slow client slows producers down.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use cookie::Cookie;
use displaydoc::Display;
use futures::Sink;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use http::HeaderMap;
use http::Uri;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tower::BoxError;
use tower::ServiceExt;
use tracing::Instrument;

use super::ClientMessage;
use super::CloseCode;
use super::ConnectionHooks;
use super::Frame;
use super::ServerMessage;
use crate::Context;
use crate::configuration;
use crate::context::CONNECTION_INIT_PAYLOAD;
use crate::error::internal_error;
use crate::graphql;
use crate::json_ext::Object;
use crate::propagation::ContextPropagator;
use crate::propagation::capture_all;
use crate::services::execution;
use crate::services::execution::ExecutionResult;
use crate::services::transport::TransportInfo;
use crate::services::transport::TransportKind;

/// Errors while writing to a session.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum SessionError {
    /// cannot serialize websocket message: {0}
    Serialization(#[from] serde_json::Error),
    /// websocket connection is closed
    ConnectionClosed,
}

/// Where a connection is in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake accepted, the session has not started.
    Connecting,
    /// Waiting for `connection_init`.
    Initializing,
    /// Acknowledged: operations may be started.
    Active,
    /// A close frame has been queued.
    Closing,
    Closed,
}

/// What the handshake of a connection carried, shared by every operation on it.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub id: String,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    /// Values every operation of the connection inherits in its [`Context`].
    pub attributes: Context,
}

#[buildstructor::buildstructor]
impl SessionInfo {
    #[builder(visibility = "pub")]
    fn new(uri: Option<Uri>, headers: Option<HeaderMap>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            uri: uri.unwrap_or_default(),
            headers: headers.unwrap_or_default(),
            remote_addr,
            attributes: Context::new(),
        }
    }

    pub fn transport_info(&self) -> TransportInfo {
        TransportInfo {
            kind: TransportKind::WebSocket,
            uri: self.uri.clone(),
            headers: self.headers.clone(),
            remote_addr: self.remote_addr,
            session_id: Some(self.id.clone()),
        }
    }

    /// Cookies sent with the handshake.
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        self.transport_info().cookies()
    }
}

/// A graphql-ws connection, ready to run.
pub struct WebSocketSession {
    info: Arc<SessionInfo>,
    service: execution::BoxCloneService,
    hooks: Arc<dyn ConnectionHooks>,
    propagators: Arc<[Arc<dyn ContextPropagator>]>,
    configuration: configuration::WebSocket,
}

impl WebSocketSession {
    pub(crate) fn new(
        info: SessionInfo,
        service: execution::BoxCloneService,
        hooks: Arc<dyn ConnectionHooks>,
        propagators: Arc<[Arc<dyn ContextPropagator>]>,
        configuration: configuration::WebSocket,
    ) -> Self {
        Self {
            info: Arc::new(info),
            service,
            hooks,
            propagators,
            configuration,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Speak the protocol over a pair of frame streams until the connection ends.
    ///
    /// Returns why the connection ended. Every operation still running is cancelled by then.
    pub async fn run<I, O>(self, incoming: I, outgoing: O) -> CloseCode
    where
        I: Stream<Item = Result<Frame, BoxError>> + Unpin + Send,
        O: Sink<Frame> + Unpin + Send + 'static,
        O::Error: fmt::Display + Send,
    {
        let span = tracing::debug_span!("websocket_session", session.id = %self.info.id);
        self.run_loop(incoming, outgoing).instrument(span).await
    }

    async fn run_loop<I, O>(self, mut incoming: I, outgoing: O) -> CloseCode
    where
        I: Stream<Item = Result<Frame, BoxError>> + Unpin + Send,
        O: Sink<Frame> + Unpin + Send + 'static,
        O::Error: fmt::Display + Send,
    {
        let (outbound, outbound_rx) = mpsc::channel(self.configuration.outbound_buffer.max(1));
        let writer = tokio::spawn(write_frames(outbound_rx, outgoing).in_current_span());
        let (finished, mut finished_rx) = mpsc::unbounded_channel();

        let init_deadline = tokio::time::sleep(self.configuration.connection_init_timeout);
        tokio::pin!(init_deadline);
        let mut keep_alive = self.configuration.keep_alive.map(|period| {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let mut connection = Connection {
            session: self,
            state: SessionState::Connecting,
            subscriptions: HashMap::new(),
            generation: 0,
            outbound,
            finished,
        };
        connection.transition(SessionState::Initializing);

        let code = loop {
            tokio::select! {
                biased;

                Some((id, generation)) = finished_rx.recv() => connection.release(&id, generation),
                _ = &mut init_deadline, if connection.state == SessionState::Initializing => {
                    tracing::debug!("connection_init not received in time");
                    break connection.close(CloseCode::ConnectionInitialisationTimeout).await;
                }
                _ = tick(&mut keep_alive) => {
                    if connection.send(&ServerMessage::Ping { payload: None }).await.is_break() {
                        break CloseCode::Abnormal;
                    }
                }
                frame = incoming.next() => match frame {
                    Some(Ok(frame)) => {
                        if let ControlFlow::Break(code) = connection.on_frame(frame).await {
                            break code;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::debug!(%error, "cannot read from websocket");
                        break CloseCode::Abnormal;
                    }
                    None => break CloseCode::Normal,
                },
            }
        };

        connection.shutdown(code).await;
        drop(connection);
        if let Err(error) = writer.await {
            tracing::error!(%error, "websocket writer failed");
        }
        code
    }
}

struct Subscription {
    generation: u64,
    task: AbortHandle,
}

/// The state of a running session, owned by its loop.
struct Connection {
    session: WebSocketSession,
    state: SessionState,
    subscriptions: HashMap<String, Subscription>,
    /// Tells apart successive operations reusing an id.
    generation: u64,
    outbound: mpsc::Sender<Frame>,
    finished: mpsc::UnboundedSender<(String, u64)>,
}

impl Connection {
    fn transition(&mut self, state: SessionState) {
        tracing::debug!(from = ?self.state, to = ?state, "websocket session state");
        self.state = state;
    }

    async fn on_frame(&mut self, frame: Frame) -> ControlFlow<CloseCode> {
        if let Frame::Close(close) = &frame {
            tracing::debug!(?close, "client closed the connection");
            return ControlFlow::Break(CloseCode::Normal);
        }
        let message = match frame.parse() {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(%error, "invalid websocket message");
                return ControlFlow::Break(self.close(CloseCode::InvalidMessage).await);
            }
        };
        tracing::trace!(?message, "received");

        match message {
            ClientMessage::ConnectionInit { payload } => self.on_connection_init(payload).await,
            ClientMessage::Subscribe { id, payload } => self.on_subscribe(id, payload).await,
            ClientMessage::Complete { id } => {
                self.on_complete(id).await;
                ControlFlow::Continue(())
            }
            ClientMessage::Ping { payload } => self.send(&ServerMessage::Pong { payload }).await,
            ClientMessage::Pong { .. } => ControlFlow::Continue(()),
        }
    }

    async fn on_connection_init(&mut self, payload: Option<Object>) -> ControlFlow<CloseCode> {
        if self.state != SessionState::Initializing {
            tracing::debug!("connection_init received twice");
            return ControlFlow::Break(self.close(CloseCode::TooManyInitialisationRequests).await);
        }

        let info = &self.session.info;
        match self.session.hooks.connection_init(info, payload.as_ref()).await {
            Ok(ack) => {
                if let Some(payload) = payload
                    && let Err(error) = info.attributes.insert(CONNECTION_INIT_PAYLOAD, payload)
                {
                    tracing::warn!(%error, "cannot store the connection_init payload");
                }
                self.transition(SessionState::Active);
                self.send(&ServerMessage::ConnectionAck { payload: ack }).await
            }
            Err(error) => {
                tracing::debug!(%error, "connection rejected");
                ControlFlow::Break(self.close(CloseCode::Forbidden).await)
            }
        }
    }

    async fn on_subscribe(&mut self, id: String, payload: Object) -> ControlFlow<CloseCode> {
        if self.state != SessionState::Active {
            tracing::debug!(id, "subscribe received before connection_ack");
            return ControlFlow::Break(self.close(CloseCode::Unauthorized).await);
        }
        if self.subscriptions.contains_key(&id) {
            tracing::debug!(id, "subscribe received for an active id");
            let frame = CloseCode::SubscriberAlreadyExists
                .frame_with_reason(format!("Subscriber for {id} already exists"));
            return ControlFlow::Break(
                self.close_with(CloseCode::SubscriberAlreadyExists, frame)
                    .await,
            );
        }

        let body = match graphql::Request::from_map(payload) {
            Ok(body) => body,
            Err(error) => {
                tracing::debug!(id, %error, "invalid operation");
                return self
                    .send(&ServerMessage::Error {
                        id,
                        payload: vec![error.to_graphql_error()],
                    })
                    .await;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let info = &self.session.info;
        let request = execution::Request::builder()
            .id(id.clone())
            .body(body)
            .context(info.attributes.snapshot())
            .transport(info.transport_info())
            .build();
        capture_all(&self.session.propagators, &request.context);

        let task = tokio::spawn(
            execute_operation(
                self.session.service.clone(),
                request,
                self.outbound.clone(),
                self.finished.clone(),
                generation,
            )
            .in_current_span(),
        );
        self.subscriptions.insert(
            id,
            Subscription {
                generation,
                task: task.abort_handle(),
            },
        );
        ControlFlow::Continue(())
    }

    async fn on_complete(&mut self, id: String) {
        if let Some(subscription) = self.subscriptions.remove(&id) {
            subscription.task.abort();
            tracing::debug!(id, "operation cancelled");
            self.session
                .hooks
                .subscription_cancelled(&self.session.info, &id)
                .await;
        }
    }

    /// Forget an operation that ended, unless its id was reused since.
    fn release(&mut self, id: &str, generation: u64) {
        if self
            .subscriptions
            .get(id)
            .is_some_and(|subscription| subscription.generation == generation)
        {
            self.subscriptions.remove(id);
        }
    }

    async fn send(&self, message: &ServerMessage) -> ControlFlow<CloseCode> {
        match send(&self.outbound, message).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(error) => {
                tracing::debug!(%error, "cannot send websocket message");
                ControlFlow::Break(CloseCode::Abnormal)
            }
        }
    }

    async fn close(&mut self, code: CloseCode) -> CloseCode {
        self.close_with(code, code.frame()).await
    }

    async fn close_with(&mut self, code: CloseCode, frame: Frame) -> CloseCode {
        self.transition(SessionState::Closing);
        if self.outbound.send(frame).await.is_err() {
            tracing::debug!("websocket closed before the close frame could be sent");
        }
        code
    }

    async fn shutdown(&mut self, code: CloseCode) {
        for (_, subscription) in self.subscriptions.drain() {
            subscription.task.abort();
        }
        self.session
            .hooks
            .connection_closed(&self.session.info, code)
            .await;
        self.transition(SessionState::Closed);
    }
}

async fn execute_operation(
    service: execution::BoxCloneService,
    request: execution::Request,
    outbound: mpsc::Sender<Frame>,
    finished: mpsc::UnboundedSender<(String, u64)>,
    generation: u64,
) {
    let id = request.id().to_string();
    let last = match service.oneshot(request).await {
        Err(error) => ServerMessage::Error {
            id: id.clone(),
            payload: vec![internal_error(&error)],
        },
        Ok(response) => match response.result {
            ExecutionResult::Single(response) if response.is_request_error() => {
                ServerMessage::Error {
                    id: id.clone(),
                    payload: response.errors,
                }
            }
            ExecutionResult::Single(response) => {
                let next = ServerMessage::Next {
                    id: id.clone(),
                    payload: response,
                };
                if send(&outbound, &next).await.is_err() {
                    return;
                }
                ServerMessage::Complete { id: id.clone() }
            }
            ExecutionResult::Stream(mut stream) => {
                let mut last = ServerMessage::Complete { id: id.clone() };
                while let Some(event) = stream.next().await {
                    match event {
                        Ok(payload) => {
                            let next = ServerMessage::Next {
                                id: id.clone(),
                                payload,
                            };
                            if send(&outbound, &next).await.is_err() {
                                return;
                            }
                        }
                        Err(errors) => {
                            last = ServerMessage::Error {
                                id: id.clone(),
                                payload: errors,
                            };
                            break;
                        }
                    }
                }
                last
            }
        },
    };

    // the id is free again before the client learns the operation ended
    if finished.send((id.clone(), generation)).is_err() {
        tracing::trace!(%id, "connection loop ended before the operation");
    }
    if let Err(error) = send(&outbound, &last).await {
        tracing::debug!(%error, "cannot send the end of an operation");
    }
}

async fn send(outbound: &mpsc::Sender<Frame>, message: &ServerMessage) -> Result<(), SessionError> {
    let frame = Frame::try_from(message)?;
    outbound
        .send(frame)
        .await
        .map_err(|_| SessionError::ConnectionClosed)
}

async fn write_frames<O>(mut frames: mpsc::Receiver<Frame>, mut sink: O)
where
    O: Sink<Frame> + Unpin,
    O::Error: fmt::Display,
{
    while let Some(frame) = frames.recv().await {
        let closing = matches!(frame, Frame::Close(_));
        tracing::trace!(?frame, "writing frame");
        if let Err(error) = sink.send(frame).await {
            tracing::debug!(%error, "cannot write to websocket");
            return;
        }
        if closing {
            break;
        }
    }
    if let Err(error) = sink.close().await {
        tracing::trace!(%error, "cannot close websocket");
    }
}

async fn tick(keep_alive: &mut Option<Interval>) {
    match keep_alive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
