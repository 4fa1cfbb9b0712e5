//! Subscriptions over `multipart/mixed` HTTP responses.
//!
//! Every event is one part whose body is `{"payload": <response>}`. A `{}` part is sent as a
//! heartbeat while the subscription is idle, and the response ends with the `--graphql--`
//! delimiter.

use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use futures::stream::select;
use serde::Serialize;
use tokio_stream::once;
use tokio_stream::wrappers::IntervalStream;

use crate::graphql;

/// Content type of multipart subscription responses.
pub(crate) const MULTIPART_SUBSCRIPTION_CONTENT_TYPE: &str =
    "multipart/mixed;boundary=\"graphql\";subscriptionSpec=1.0";

#[cfg(test)]
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

const FIRST_PART_HEADER: &[u8] = b"\r\n--graphql\r\ncontent-type: application/json\r\n\r\n";
const PART_HEADER: &[u8] = b"\r\ncontent-type: application/json\r\n\r\n";

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("serialization error")]
    SerdeError(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize)]
struct SubscriptionPayload {
    payload: Option<graphql::Response>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<graphql::Error>,
}

enum MessageKind {
    Heartbeat,
    Message(graphql::Response),
    Errors(Vec<graphql::Error>),
    Eof,
}

pub(crate) struct Multipart {
    stream: Pin<Box<dyn Stream<Item = MessageKind> + Send>>,
    is_first_chunk: bool,
    is_terminated: bool,
}

impl Multipart {
    pub(crate) fn new(stream: graphql::SubscriptionStream) -> Self {
        let events = stream
            .map(|item| match item {
                Ok(response) => MessageKind::Message(response),
                Err(errors) => MessageKind::Errors(errors),
            })
            .chain(once(MessageKind::Eof));
        let heartbeats = IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL))
            .map(|_| MessageKind::Heartbeat);

        Self {
            stream: select(events, heartbeats).boxed(),
            is_first_chunk: true,
            is_terminated: false,
        }
    }

    fn part_header(&mut self) -> Vec<u8> {
        if self.is_first_chunk {
            self.is_first_chunk = false;
            Vec::from(FIRST_PART_HEADER)
        } else {
            Vec::from(PART_HEADER)
        }
    }
}

impl Stream for Multipart {
    type Item = Result<Bytes, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        if self.is_terminated {
            return Poll::Ready(None);
        }
        match self.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(MessageKind::Heartbeat)) => {
                let mut buf = self.part_header();
                buf.extend_from_slice(b"{}\r\n--graphql");
                Poll::Ready(Some(Ok(buf.into())))
            }
            Poll::Ready(Some(MessageKind::Message(response))) => {
                let mut buf = self.part_header();
                serde_json::to_writer(
                    &mut buf,
                    &SubscriptionPayload {
                        payload: Some(response),
                        errors: Vec::new(),
                    },
                )?;
                buf.extend_from_slice(b"\r\n--graphql");
                Poll::Ready(Some(Ok(buf.into())))
            }
            Poll::Ready(Some(MessageKind::Errors(errors))) => {
                // the subscription failed, nothing else is read from it
                self.is_terminated = true;
                let mut buf = self.part_header();
                serde_json::to_writer(
                    &mut buf,
                    &SubscriptionPayload {
                        payload: None,
                        errors,
                    },
                )?;
                buf.extend_from_slice(b"\r\n--graphql--\r\n");
                Poll::Ready(Some(Ok(buf.into())))
            }
            Poll::Ready(Some(MessageKind::Eof)) => {
                self.is_terminated = true;
                let mut buf = self.part_header();
                buf.extend_from_slice(b"{}\r\n--graphql--\r\n");
                Poll::Ready(Some(Ok(buf.into())))
            }
            Poll::Ready(None) => {
                self.is_terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
