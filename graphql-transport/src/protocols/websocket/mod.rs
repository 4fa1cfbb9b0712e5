//! Implements the _server_ side of the graphql-ws protocol for GraphQL over WebSocket.
//!
//! Protocol reference:
//! <https://github.com/enisdenjo/graphql-ws/blob/0c0eb499c3a0278c6d9cc799064f22c5d24d2f60/PROTOCOL.md>

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;

mod hooks;
mod session;

pub use hooks::AcceptAll;
pub use hooks::ConnectionHooks;
pub use session::SessionError;
pub use session::SessionInfo;
pub use session::SessionState;
pub use session::WebSocketSession;

/// The WebSocket subprotocol name of the graphql-ws protocol.
pub const GRAPHQL_TRANSPORT_WS_PROTOCOL: &str = "graphql-transport-ws";

/// WebSocket messages sent from the client.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A new connection
    ConnectionInit {
        /// Optional init payload from the client
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Object>,
    },
    /// The start of an operation
    Subscribe {
        /// Operation ID, unique among the active operations of the connection
        id: String,
        /// The GraphQL request, validated when the operation starts
        payload: Object,
    },
    /// The end of an operation, sent by the client to cancel it
    Complete {
        /// Operation ID
        id: String,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
}

/// WebSocket messages sent by the server.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionAck {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Object>,
    },
    /// One execution result: the single result of a query or mutation, or one subscription
    /// event.
    Next {
        id: String,
        payload: graphql::Response,
    },
    /// The operation failed before producing a result, or its stream ended with errors. No
    /// further message is sent for this id.
    Error {
        id: String,
        payload: Vec<graphql::Error>,
    },
    Complete {
        id: String,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        payload: Option<Value>,
    },
}

/// Close codes used by the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CloseCode {
    /// The connection ended normally, or the client closed it.
    Normal,
    /// The transport failed. Reported only, never sent.
    Abnormal,
    InvalidMessage,
    Unauthorized,
    Forbidden,
    ConnectionInitialisationTimeout,
    SubscriberAlreadyExists,
    TooManyInitialisationRequests,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidMessage => 4400,
            CloseCode::Unauthorized => 4401,
            CloseCode::Forbidden => 4403,
            CloseCode::ConnectionInitialisationTimeout => 4408,
            CloseCode::SubscriberAlreadyExists => 4409,
            CloseCode::TooManyInitialisationRequests => 4429,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "Normal Closure",
            CloseCode::Abnormal => "Abnormal Closure",
            CloseCode::InvalidMessage => "Invalid message received",
            CloseCode::Unauthorized => "Unauthorized",
            CloseCode::Forbidden => "Forbidden",
            CloseCode::ConnectionInitialisationTimeout => "Connection initialisation timeout",
            CloseCode::SubscriberAlreadyExists => "Subscriber already exists",
            CloseCode::TooManyInitialisationRequests => "Too many initialisation requests",
        }
    }

    /// The close frame for this code, with its standard reason.
    pub fn frame(self) -> Frame {
        self.frame_with_reason(self.reason())
    }

    pub fn frame_with_reason(self, reason: impl Into<String>) -> Frame {
        Frame::Close(Some(CloseFrame {
            code: self.as_u16(),
            reason: reason.into(),
        }))
    }
}

/// One transport-level WebSocket message.
///
/// Control frames other than close are handled by the WebSocket implementation and never reach
/// the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close(Option<CloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl Frame {
    pub(crate) fn parse(&self) -> Result<ClientMessage, serde_json::Error> {
        match self {
            Frame::Text(text) => serde_json::from_str(text),
            Frame::Binary(bytes) => serde_json::from_slice(bytes),
            Frame::Close(_) => Err(serde::de::Error::custom("close frames carry no message")),
        }
    }
}

impl TryFrom<&ServerMessage> for Frame {
    type Error = serde_json::Error;

    fn try_from(message: &ServerMessage) -> Result<Self, Self::Error> {
        serde_json::to_string(message).map(Frame::Text)
    }
}
