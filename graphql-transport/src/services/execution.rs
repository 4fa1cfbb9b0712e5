use std::fmt;

use futures::Stream;
use futures::StreamExt;
use http::HeaderMap;
use http::StatusCode;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;
use static_assertions::assert_impl_all;
use tower::BoxError;

use crate::Context;
use crate::engine::ExecutionInput;
use crate::graphql;
use crate::services::transport::TransportInfo;

pub type BoxCloneService = tower::util::BoxCloneSyncService<Request, Response, BoxError>;
pub type ServiceResult = Result<Response, BoxError>;

assert_impl_all!(Request: Send);
/// A GraphQL request on its way to the engine.
#[non_exhaustive]
pub struct Request {
    /// Correlates the request with its response, unique within its scope (the WebSocket
    /// connection, or globally for HTTP).
    id: String,

    /// The GraphQL request as sent by the client.
    pub body: graphql::Request,

    /// Context for extension
    pub context: Context,

    pub transport: TransportInfo,
}

#[buildstructor::buildstructor]
impl Request {
    /// This is the constructor (or builder) to use when constructing a real execution Request.
    #[builder(visibility = "pub")]
    fn new(
        id: String,
        body: graphql::Request,
        context: Context,
        transport: TransportInfo,
    ) -> Request {
        Self {
            id,
            body,
            context,
            transport,
        }
    }

    /// This is the constructor (or builder) to use when constructing a "fake" execution Request.
    ///
    /// A random id is used when none is given.
    #[builder(visibility = "pub")]
    fn fake_new(
        id: Option<String>,
        query: Option<String>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
        context: Option<Context>,
        transport: Option<TransportInfo>,
    ) -> Request {
        Request::new(
            id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            graphql::Request::builder()
                .and_query(query)
                .and_operation_name(operation_name)
                .variables(variables)
                .build(),
            context.unwrap_or_default(),
            transport.unwrap_or_default(),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the GraphQL body, keeping the id, context and transport.
    pub fn map_body<F>(self, f: F) -> Request
    where
        F: FnOnce(graphql::Request) -> graphql::Request,
    {
        Request {
            body: f(self.body),
            ..self
        }
    }

    /// What the engine gets to execute.
    pub fn to_execution_input(&self) -> ExecutionInput {
        ExecutionInput {
            execution_id: self.id.clone(),
            document: self.body.query.clone().unwrap_or_default(),
            operation_name: self.body.operation_name.clone(),
            variables: self.body.variables.clone(),
            extensions: self.body.extensions.clone(),
            context: self.context.clone(),
            transport: self.transport.clone(),
        }
    }
}

/// The result of an execution: a single response, or the events of a subscription.
pub enum ExecutionResult {
    Single(graphql::Response),
    Stream(graphql::SubscriptionStream),
}

impl ExecutionResult {
    pub fn is_stream(&self) -> bool {
        matches!(self, ExecutionResult::Stream(_))
    }
}

impl fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Single(response) => f.debug_tuple("Single").field(response).finish(),
            ExecutionResult::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// The response to an execution [`Request`], carrying the same id.
#[non_exhaustive]
#[derive(Debug)]
pub struct Response {
    id: String,

    pub result: ExecutionResult,

    /// Headers to send back on transports that have them.
    pub headers: HeaderMap,

    /// Status hint for HTTP transports, `200 OK` when absent.
    pub status_code: Option<StatusCode>,

    pub context: Context,
}

#[buildstructor::buildstructor]
impl Response {
    /// This is the constructor (or builder) to use when constructing a single value Response.
    #[builder(visibility = "pub")]
    fn new(
        id: String,
        data: Option<Value>,
        errors: Vec<graphql::Error>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        extensions: JsonMap<ByteString, Value>,
        status_code: Option<StatusCode>,
        context: Context,
    ) -> Self {
        Self {
            id,
            result: ExecutionResult::Single(
                graphql::Response::builder()
                    .and_data(data)
                    .errors(errors)
                    .extensions(extensions)
                    .build(),
            ),
            headers: HeaderMap::new(),
            status_code,
            context,
        }
    }

    /// This is the constructor (or builder) to use when short circuiting with errors.
    #[builder(visibility = "pub")]
    fn error_new(
        id: String,
        errors: Vec<graphql::Error>,
        status_code: Option<StatusCode>,
        context: Context,
    ) -> Self {
        Self::new(id, None, errors, Default::default(), status_code, context)
    }

    pub fn from_result(id: String, result: ExecutionResult, context: Context) -> Self {
        Self {
            id,
            result,
            headers: HeaderMap::new(),
            status_code: None,
            context,
        }
    }

    /// A subscription response.
    pub fn from_stream<S>(id: String, stream: S, context: Context) -> Self
    where
        S: Stream<Item = Result<graphql::Response, Vec<graphql::Error>>> + Send + 'static,
    {
        Self::from_result(id, ExecutionResult::Stream(stream.boxed()), context)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_stream(&self) -> bool {
        self.result.is_stream()
    }

    /// Whether a single value response carries `data`. Streams have no data of their own.
    pub fn is_data_present(&self) -> bool {
        match &self.result {
            ExecutionResult::Single(response) => response.is_data_present(),
            ExecutionResult::Stream(_) => false,
        }
    }

    /// Transform a single value response. Streams are left untouched.
    pub fn map_single<F>(self, f: F) -> Response
    where
        F: FnOnce(graphql::Response) -> graphql::Response,
    {
        let result = match self.result {
            ExecutionResult::Single(response) => ExecutionResult::Single(f(response)),
            stream => stream,
        };
        Response { result, ..self }
    }

    /// Transform every event of a stream. Single value responses are left untouched.
    pub fn map_stream<F>(self, f: F) -> Response
    where
        F: FnMut(graphql::Response) -> graphql::Response + Send + 'static,
    {
        let result = match self.result {
            ExecutionResult::Stream(stream) => {
                let mut f = f;
                ExecutionResult::Stream(stream.map(move |item| item.map(&mut f)).boxed())
            }
            single => single,
        };
        Response { result, ..self }
    }

    /// Transform the response whatever its shape: applied once to a single value, or to every
    /// event of a stream.
    pub fn map_responses<F>(self, f: F) -> Response
    where
        F: FnMut(graphql::Response) -> graphql::Response + Send + 'static,
    {
        if self.is_stream() {
            self.map_stream(f)
        } else {
            let mut f = f;
            self.map_single(|response| f(response))
        }
    }

    /// The single value response, if this is not a stream.
    pub fn into_single(self) -> Option<graphql::Response> {
        match self.result {
            ExecutionResult::Single(response) => Some(response),
            ExecutionResult::Stream(_) => None,
        }
    }
}
