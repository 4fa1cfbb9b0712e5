use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::error::RequestError;
use crate::json_ext::Object;
use crate::json_ext::ensure_object;

/// A GraphQL `Request` as sent by a client, whatever the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Request {
    /// The GraphQL document (query, mutation or subscription).
    ///
    /// For historical purposes, the term "query" is commonly used to refer to
    /// *any* GraphQL operation which might be, e.g., a `subscription`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,

    /// The (optional) GraphQL operation name.
    ///
    /// When specified, this name must match the name of an operation in the
    /// GraphQL document.  When excluded, there must exist only a single
    /// operation in the GraphQL document.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_name: Option<String>,

    /// The (optional) GraphQL variables in the form of a JSON object.
    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "deserialize_null_default"
    )]
    pub variables: Object,

    /// The (optional) GraphQL `extensions` of a GraphQL request.
    ///
    /// The implementations of extensions are server specific and not specified by
    /// the GraphQL specification.
    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "deserialize_null_default"
    )]
    pub extensions: Object,
}

// NOTE: this deserialize helper is used to transform `null` to Default::default()
fn deserialize_null_default<'de, D, T: Default + Deserialize<'de>>(
    deserializer: D,
) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Option<T>>::deserialize(deserializer).map(|x| x.unwrap_or_default())
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub")]
    /// This is the constructor (or builder) to use when constructing a GraphQL
    /// `Request`.
    ///
    /// It does not validate the document: requests coming from the wire go through
    /// [`Request::from_map`] or [`Request::from_bytes`] instead.
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor’s map special-casing
        variables: JsonMap<ByteString, Value>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
            extensions,
        }
    }

    /// Parse a JSON request body.
    ///
    /// The body must be a JSON object, which is then validated with [`Request::from_map`].
    pub fn from_bytes(bytes: &Bytes) -> Result<Request, RequestError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|error| RequestError::MalformedJson(error.to_string()))?;
        let object = ensure_object!(value).map_err(RequestError::NotAnObject)?;
        Self::from_map(object)
    }

    /// Build a request out of a raw `application/graphql` body: the whole body is the document.
    pub fn from_document(bytes: &Bytes) -> Result<Request, RequestError> {
        let document = std::str::from_utf8(bytes).map_err(|_| RequestError::InvalidQuery)?;
        if document.trim().is_empty() {
            return Err(RequestError::MissingQuery);
        }
        Ok(Self::builder().query(document).build())
    }

    /// Validate and convert a decoded payload map.
    ///
    /// The `query` must be a non blank string, `operationName` a string or null, and
    /// `variables`/`extensions` maps or null.
    pub fn from_map(mut object: Object) -> Result<Request, RequestError> {
        let query = match object.remove("query") {
            Some(Value::String(query)) if !query.as_str().trim().is_empty() => {
                query.as_str().to_string()
            }
            Some(Value::String(_)) | Some(Value::Null) | None => {
                return Err(RequestError::MissingQuery);
            }
            Some(_) => return Err(RequestError::InvalidQuery),
        };
        let operation_name = match object.remove("operationName") {
            Some(Value::String(name)) => Some(name.as_str().to_string()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(RequestError::InvalidOperationName),
        };
        let variables = take_map(&mut object, "variables")?;
        let extensions = take_map(&mut object, "extensions")?;

        Ok(Self {
            query: Some(query),
            operation_name,
            variables,
            extensions,
        })
    }

    /// Whether the request carries a non blank document.
    pub fn has_document(&self) -> bool {
        self.query
            .as_deref()
            .is_some_and(|query| !query.trim().is_empty())
    }
}

fn take_map(object: &mut Object, key: &'static str) -> Result<Object, RequestError> {
    match object.remove(key) {
        Some(Value::Object(map)) => Ok(map),
        Some(Value::Null) | None => Ok(Object::new()),
        Some(_) => Err(RequestError::InvalidMap(key)),
    }
}
