//! Logic for loading configuration in to an object model

use std::time::Duration;

use displaydoc::Display;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
    /// invalid path '{path}' for {endpoint}: paths must start with '/' and contain no wildcard
    InvalidPath {
        endpoint: &'static str,
        path: String,
    },
    /// websocket.outbound_buffer must be greater than zero
    ZeroOutboundBuffer,
}

/// The transport configuration.
///
/// Can be created through `serde::Deserialize` from various formats, with
/// [`Configuration::from_yaml`], or inline in Rust code with the builders.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// GraphQL over HTTP.
    pub http: Http,

    /// GraphQL over WebSocket, with the `graphql-transport-ws` sub-protocol.
    pub websocket: WebSocket,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(http: Option<Http>, websocket: Option<WebSocket>) -> Self {
        Self {
            http: http.unwrap_or_default(),
            websocket: websocket.unwrap_or_default(),
        }
    }

    /// Parse and validate a YAML document. An empty document yields the defaults.
    pub fn from_yaml(raw_yaml: &str) -> Result<Self, ConfigurationError> {
        let configuration = if raw_yaml.trim().is_empty() {
            Configuration::default()
        } else {
            serde_yaml::from_str(raw_yaml).map_err(|e| {
                ConfigurationError::InvalidConfiguration {
                    message: "failed to parse yaml",
                    error: e.to_string(),
                }
            })?
        };
        configuration.validate()?;
        Ok(configuration)
    }

    /// The JSON schema of the YAML configuration, for editor support.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(Configuration)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_path("http.path", &self.http.path)?;
        validate_path("websocket.path", &self.websocket.path)?;
        if self.websocket.outbound_buffer == 0 {
            return Err(ConfigurationError::ZeroOutboundBuffer);
        }
        Ok(())
    }
}

fn validate_path(endpoint: &'static str, path: &str) -> Result<(), ConfigurationError> {
    if !path.starts_with('/') || path.contains('*') || path.contains('{') {
        return Err(ConfigurationError::InvalidPath {
            endpoint,
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Configuration options pertaining to the HTTP endpoint.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Http {
    /// The HTTP path on which GraphQL requests will be served.
    /// default: "/graphql"
    pub path: String,

    /// Subscriptions over Server-Sent Events, for clients accepting `text/event-stream`.
    pub sse: Sse,

    /// Subscriptions over `multipart/mixed` responses.
    /// default: true
    pub multipart: bool,
}

#[buildstructor::buildstructor]
impl Http {
    #[builder]
    pub fn new(path: Option<String>, sse: Option<Sse>, multipart: Option<bool>) -> Self {
        Self {
            path: path.unwrap_or_else(default_graphql_path),
            sse: sse.unwrap_or_default(),
            multipart: multipart.unwrap_or(true),
        }
    }
}

impl Default for Http {
    fn default() -> Self {
        Http::builder().build()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Sse {
    /// default: true
    pub enabled: bool,

    /// Interval between keep-alive comments, in human-readable format. None by default.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>", default)]
    pub keep_alive: Option<Duration>,
}

#[buildstructor::buildstructor]
impl Sse {
    #[builder]
    pub fn new(enabled: Option<bool>, keep_alive: Option<Duration>) -> Self {
        Self {
            enabled: enabled.unwrap_or(true),
            keep_alive,
        }
    }
}

impl Default for Sse {
    fn default() -> Self {
        Sse::builder().build()
    }
}

/// Configuration options pertaining to the WebSocket endpoint.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct WebSocket {
    /// default: true
    pub enabled: bool,

    /// The path of the WebSocket endpoint. It may be the same as `http.path`.
    /// default: "/graphql"
    pub path: String,

    /// How long a client has to send `connection_init` after the handshake; defaults to 60s
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub connection_init_timeout: Duration,

    /// Interval between server `ping` messages. None by default.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>", default)]
    pub keep_alive: Option<Duration>,

    /// Number of outgoing messages buffered per connection before producers wait for the
    /// client; defaults to 128
    pub outbound_buffer: usize,
}

#[buildstructor::buildstructor]
impl WebSocket {
    #[builder]
    pub fn new(
        enabled: Option<bool>,
        path: Option<String>,
        connection_init_timeout: Option<Duration>,
        keep_alive: Option<Duration>,
        outbound_buffer: Option<usize>,
    ) -> Self {
        Self {
            enabled: enabled.unwrap_or(true),
            path: path.unwrap_or_else(default_graphql_path),
            connection_init_timeout: connection_init_timeout
                .unwrap_or_else(default_connection_init_timeout),
            keep_alive,
            outbound_buffer: outbound_buffer.unwrap_or(DEFAULT_OUTBOUND_BUFFER),
        }
    }
}

impl Default for WebSocket {
    fn default() -> Self {
        WebSocket::builder().build()
    }
}

const DEFAULT_OUTBOUND_BUFFER: usize = 128;

fn default_graphql_path() -> String {
    String::from("/graphql")
}

fn default_connection_init_timeout() -> Duration {
    Duration::from_secs(60)
}
