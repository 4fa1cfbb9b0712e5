//! Bearer token authentication.
//!
//! Tokens are checked by an [`AuthenticationProvider`]. Over HTTP, and for WebSocket handshakes
//! carrying the header, the [`Authentication`] interceptor reads the `Authorization` header of
//! each request. WebSocket clients that cannot set headers send the token in their
//! `connection_init` payload instead, which [`AuthenticatingConnectionHooks`] checks once per
//! connection.

use std::sync::Arc;

use displaydoc::Display;
use http::HeaderMap;
use http::StatusCode;
use http::header::AUTHORIZATION;
use thiserror::Error;
use tower::BoxError;

use crate::Context;
use crate::error::UNAUTHENTICATED;
use crate::graphql;
use crate::graphql::ErrorClassification;
use crate::interceptor::Interceptor;
use crate::interceptor::Next;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::protocols::websocket::ConnectionHooks;
use crate::protocols::websocket::SessionInfo;
use crate::services::execution;

const BEARER: &str = "Bearer";

/// Key of the token in a `connection_init` payload.
pub const CONNECTION_INIT_AUTHORIZATION: &str = "Authorization";

/// An authenticated client, stored in the [`Context`] extensions of its requests.
#[derive(Clone, Debug, PartialEq)]
pub struct Principal {
    pub name: String,
    pub claims: Object,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            claims: Object::new(),
        }
    }

    pub fn with_claims(mut self, claims: Object) -> Self {
        self.claims = claims;
        self
    }

    /// The principal authenticated for a request, if any.
    pub fn from_context(context: &Context) -> Option<Principal> {
        context
            .extensions()
            .with_lock(|lock| lock.get::<Principal>().cloned())
    }
}

/// Checks bearer tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AuthenticationProvider: Send + Sync + 'static {
    /// The principal a token stands for. `Err` rejects the token; the reason is logged and not
    /// sent to the client.
    async fn authenticate(&self, token: &str) -> Result<Principal, BoxError>;
}

#[derive(Debug, Error, Display)]
pub(crate) enum AuthenticationError {
    /// missing credentials
    MissingCredentials,
    /// header value is not convertible to a string
    CannotConvertToString,
    /// credentials must be a 'Bearer' token
    InvalidCredentials,
    /// invalid credentials
    Rejected,
}

impl AuthenticationError {
    fn to_graphql_error(&self) -> graphql::Error {
        graphql::Error::builder()
            .message(self.to_string())
            .extension_code(UNAUTHENTICATED)
            .classification(ErrorClassification::Unauthorized)
            .build()
    }
}

/// Strips the case insensitive `Bearer` prefix of a credential.
fn bearer_token(value: &str) -> Option<&str> {
    let (prefix, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (prefix.eq_ignore_ascii_case(BEARER) && !token.is_empty()).then_some(token)
}

fn extract_token(headers: &HeaderMap) -> Option<Result<&str, AuthenticationError>> {
    let value = headers.get(AUTHORIZATION)?;
    let Ok(value) = value.to_str() else {
        return Some(Err(AuthenticationError::CannotConvertToString));
    };
    Some(bearer_token(value).ok_or(AuthenticationError::InvalidCredentials))
}

/// Interceptor authenticating requests from their `Authorization: Bearer <token>` header.
///
/// Requests that already carry a [`Principal`], such as the operations of a WebSocket connection
/// authenticated by [`AuthenticatingConnectionHooks`], are passed through. Failures are answered
/// with an `UNAUTHENTICATED` error and a `401` status, without running the rest of the chain.
pub struct Authentication {
    provider: Arc<dyn AuthenticationProvider>,
    required: bool,
}

impl Authentication {
    pub fn new(provider: impl AuthenticationProvider) -> Self {
        Self {
            provider: Arc::new(provider),
            required: false,
        }
    }

    /// Also reject requests without credentials. Defaults to `false`.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    fn failure(request: execution::Request, error: AuthenticationError) -> execution::Response {
        tracing::debug!(message = %error, "authentication failure");
        execution::Response::error_builder()
            .id(request.id().to_string())
            .error(error.to_graphql_error())
            .status_code(StatusCode::UNAUTHORIZED)
            .context(request.context)
            .build()
    }
}

#[async_trait::async_trait]
impl Interceptor for Authentication {
    async fn intercept(
        &self,
        request: execution::Request,
        next: Next,
    ) -> Result<execution::Response, BoxError> {
        if Principal::from_context(&request.context).is_some() {
            return next.run(request).await;
        }

        let token =
            extract_token(&request.transport.headers).map(|token| token.map(str::to_string));
        let token = match token {
            None if self.required => {
                return Ok(Self::failure(
                    request,
                    AuthenticationError::MissingCredentials,
                ));
            }
            None => return next.run(request).await,
            Some(Err(error)) => return Ok(Self::failure(request, error)),
            Some(Ok(token)) => token,
        };

        match self.provider.authenticate(&token).await {
            Ok(principal) => {
                request
                    .context
                    .extensions()
                    .with_lock(|mut lock| lock.insert(principal));
                next.run(request).await
            }
            Err(error) => {
                tracing::debug!(%error, "token rejected");
                Ok(Self::failure(request, AuthenticationError::Rejected))
            }
        }
    }
}

/// Connection hooks authenticating WebSocket connections from the `Authorization` entry of their
/// `connection_init` payload.
///
/// The entry is a token, optionally prefixed with `Bearer`. The [`Principal`] is stored in the
/// session attributes, so every operation of the connection carries it. A rejected token closes
/// the connection with `4403 Forbidden`.
pub struct AuthenticatingConnectionHooks {
    provider: Arc<dyn AuthenticationProvider>,
    required: bool,
}

impl AuthenticatingConnectionHooks {
    pub fn new(provider: impl AuthenticationProvider) -> Self {
        Self {
            provider: Arc::new(provider),
            required: false,
        }
    }

    /// Also refuse connections without credentials. Defaults to `false`: such connections can
    /// still be authenticated by the [`Authentication`] interceptor from the handshake headers.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

#[async_trait::async_trait]
impl ConnectionHooks for AuthenticatingConnectionHooks {
    async fn connection_init(
        &self,
        session: &SessionInfo,
        payload: Option<&Object>,
    ) -> Result<Option<Object>, BoxError> {
        let credentials = payload.and_then(|payload| payload.get(CONNECTION_INIT_AUTHORIZATION));
        let token = match credentials {
            None if self.required => return Err(AuthenticationError::MissingCredentials.into()),
            None => return Ok(None),
            Some(Value::String(value)) => {
                let value = value.as_str().trim();
                match bearer_token(value) {
                    Some(token) => token,
                    // a prefix without a token, or another scheme
                    None if value.eq_ignore_ascii_case(BEARER) || value.contains(' ') => {
                        return Err(AuthenticationError::InvalidCredentials.into());
                    }
                    None => value,
                }
            }
            Some(_) => return Err(AuthenticationError::InvalidCredentials.into()),
        };
        if token.is_empty() {
            return Err(AuthenticationError::InvalidCredentials.into());
        }

        let principal = self.provider.authenticate(token).await.map_err(|error| {
            tracing::debug!(%error, session.id = %session.id, "token rejected");
            AuthenticationError::Rejected
        })?;
        tracing::debug!(session.id = %session.id, principal = %principal.name, "connection authenticated");
        session
            .attributes
            .extensions()
            .with_lock(|mut lock| lock.insert(principal));
        Ok(None)
    }
}
