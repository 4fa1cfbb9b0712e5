use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// A GraphQL response, or one event of a subscription.
///
/// The wire form omits `data` when it is absent (a `null` value is still written), and omits
/// `errors` and `extensions` when they are empty.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<Error>, extensions: Map<ByteString, Value>) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// Whether the engine produced a `data` entry, even a `null` one.
    pub fn is_data_present(&self) -> bool {
        self.data.is_some()
    }

    /// A request error: errors were raised before execution started, so there is no data.
    pub fn is_request_error(&self) -> bool {
        self.data.is_none() && !self.errors.is_empty()
    }

    /// The wire representation of this response.
    pub fn to_object(&self) -> Result<Object, serde_json::Error> {
        let mut object = Object::new();
        if let Some(data) = &self.data {
            object.insert("data", data.clone());
        }
        if !self.errors.is_empty() {
            let errors = self
                .errors
                .iter()
                .map(serde_json_bytes::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            object.insert("errors", Value::Array(errors));
        }
        if !self.extensions.is_empty() {
            object.insert("extensions", Value::Object(self.extensions.clone()));
        }
        Ok(object)
    }
}
