//! HTTP content negotiation using the Accept and Content-Type headers.

use http::HeaderMap;
use http::header::ACCEPT;
use http::header::CONTENT_TYPE;
use mediatype::MediaType;
use mediatype::MediaTypeList;
use mediatype::ReadParams;

use crate::error::RequestError;

pub(crate) const APPLICATION_JSON_HEADER_VALUE: &str = "application/json";
pub(crate) const GRAPHQL_JSON_RESPONSE_HEADER_VALUE: &str = "application/graphql-response+json";
const MULTIPART_SUBSCRIPTION_SPEC_PARAMETER: &str = "subscriptionSpec";
const MULTIPART_SUBSCRIPTION_SPEC_VALUE: &str = "1.0";

/// The response formats a client accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ClientRequestAccepts {
    pub(crate) json: bool,
    pub(crate) graphql_response_json: bool,
    pub(crate) wildcard: bool,
    pub(crate) event_stream: bool,
    pub(crate) multipart_subscription: bool,
}

impl ClientRequestAccepts {
    /// Whether a single JSON response can be sent.
    pub(crate) fn single_response(&self) -> bool {
        self.json || self.graphql_response_json || self.wildcard
    }

    pub(crate) fn is_acceptable(&self) -> bool {
        self.single_response() || self.event_stream || self.multipart_subscription
    }

    /// Content type of single JSON responses.
    pub(crate) fn single_response_content_type(&self) -> &'static str {
        if self.graphql_response_json {
            GRAPHQL_JSON_RESPONSE_HEADER_VALUE
        } else {
            APPLICATION_JSON_HEADER_VALUE
        }
    }
}

/// How the body of a POST request is encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RequestContentType {
    /// `application/json`: a JSON object with `query`, `operationName`, `variables` and
    /// `extensions`.
    Json,
    /// `application/graphql`: the body is the document.
    GraphQl,
}

pub(crate) fn parse_content_type(headers: &HeaderMap) -> Result<RequestContentType, RequestError> {
    let raw = headers
        .get(CONTENT_TYPE)
        .and_then(|header| header.to_str().ok())
        .unwrap_or_default();
    let unsupported = || RequestError::UnsupportedContentType(raw.to_string());
    let mime = MediaType::parse(raw).map_err(|_| unsupported())?;
    if is_json_type(&mime) {
        Ok(RequestContentType::Json)
    } else if is_graphql_type(&mime) {
        Ok(RequestContentType::GraphQl)
    } else {
        Err(unsupported())
    }
}

fn is_json_type(mime: &MediaType) -> bool {
    use mediatype::names::APPLICATION;
    use mediatype::names::JSON;

    mime.ty == APPLICATION && (mime.subty == JSON || is_graphql_response_json(mime))
}

fn is_graphql_response_json(mime: &MediaType) -> bool {
    use mediatype::names::APPLICATION;
    use mediatype::names::JSON;

    mime.ty == APPLICATION
        && mime.subty.as_str() == "graphql-response"
        && mime.suffix == Some(JSON)
}

fn is_graphql_type(mime: &MediaType) -> bool {
    use mediatype::names::APPLICATION;

    mime.ty == APPLICATION && mime.subty.as_str() == "graphql" && mime.suffix.is_none()
}

fn is_wildcard(mime: &MediaType) -> bool {
    use mediatype::names::_STAR;

    mime.ty == _STAR && mime.subty == _STAR
}

fn is_event_stream(mime: &MediaType) -> bool {
    mime.ty.as_str() == "text" && mime.subty.as_str() == "event-stream"
}

/// `multipart/mixed`, without a spec parameter or with the supported subscription spec.
fn is_multipart_subscription(mime: &MediaType) -> bool {
    use mediatype::names::MIXED;
    use mediatype::names::MULTIPART;

    let Some(parameter) = mediatype::Name::new(MULTIPART_SUBSCRIPTION_SPEC_PARAMETER) else {
        return false;
    };
    let Some(value) = mediatype::Value::new(MULTIPART_SUBSCRIPTION_SPEC_VALUE) else {
        return false;
    };

    mime.ty == MULTIPART
        && mime.subty == MIXED
        && mime
            .get_param(parameter)
            .is_none_or(|requested| requested == value)
}

/// Builds and returns `ClientRequestAccepts` from the `ACCEPT` content header.
pub(crate) fn parse_accept_header(headers: &HeaderMap) -> ClientRequestAccepts {
    let mut accept_header_present = false;
    let mut accepts = ClientRequestAccepts::default();

    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|header| {
            accept_header_present = true;
            header.to_str().ok()
        })
        .flat_map(MediaTypeList::new)
        .flatten()
        .for_each(|mime| {
            accepts.json = accepts.json || (is_json_type(&mime) && mime.suffix.is_none());
            accepts.graphql_response_json =
                accepts.graphql_response_json || is_graphql_response_json(&mime);
            accepts.wildcard = accepts.wildcard || is_wildcard(&mime);
            accepts.event_stream = accepts.event_stream || is_event_stream(&mime);
            accepts.multipart_subscription =
                accepts.multipart_subscription || is_multipart_subscription(&mime);
        });

    if !accept_header_present {
        accepts.json = true;
    }

    accepts
}
