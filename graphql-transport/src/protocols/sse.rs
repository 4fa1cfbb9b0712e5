//! GraphQL over Server-Sent Events.
//!
//! Every subscription event is a `next` event, the end of the subscription a `complete` event. A
//! failed subscription sends one `error` event carrying the errors and ends the response.

use std::future::ready;
use std::time::Duration;

use axum::response::IntoResponse;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use futures::StreamExt;
use tokio_stream::once;

use crate::error::OPERATION_NOT_SUPPORTED;
use crate::graphql;
use crate::graphql::ErrorClassification;
use crate::services::ExecutionResult;

enum SseMessage {
    Next(graphql::Response),
    Error(Vec<graphql::Error>),
    Complete,
}

impl SseMessage {
    fn into_event(self) -> Result<Event, axum::Error> {
        match self {
            SseMessage::Next(response) => Event::default().event("next").json_data(response),
            SseMessage::Error(errors) => Event::default().event("error").json_data(errors),
            SseMessage::Complete => Ok(Event::default().event("complete").data("")),
        }
    }
}

/// Render an execution result as an event stream.
///
/// Single results cannot be streamed: they are answered with an `OPERATION_NOT_SUPPORTED` error
/// event.
pub(crate) fn into_response(
    result: ExecutionResult,
    keep_alive: Option<Duration>,
) -> axum::response::Response {
    let messages = match result {
        ExecutionResult::Stream(stream) => stream
            .map(|item| match item {
                Ok(response) => SseMessage::Next(response),
                Err(errors) => SseMessage::Error(errors),
            })
            .chain(once(SseMessage::Complete))
            .scan(false, |failed, message| {
                if *failed {
                    return ready(None);
                }
                *failed = matches!(message, SseMessage::Error(_));
                ready(Some(message))
            })
            .boxed(),
        ExecutionResult::Single(_) => {
            tracing::debug!("single result requested over server-sent events");
            once(SseMessage::Error(vec![
                graphql::Error::builder()
                    .message("only subscriptions can be executed over server-sent events")
                    .extension_code(OPERATION_NOT_SUPPORTED)
                    .classification(ErrorClassification::BadRequest)
                    .build(),
            ]))
            .boxed()
        }
    };

    let sse = Sse::new(messages.map(SseMessage::into_event));
    match keep_alive {
        Some(interval) => sse.keep_alive(KeepAlive::new().interval(interval)).into_response(),
        None => sse.into_response(),
    }
}
