//! What a request carried at the transport level, as seen by interceptors and the engine.

use std::net::SocketAddr;

use cookie::Cookie;
use http::HeaderMap;
use http::Uri;
use http::header::COOKIE;

/// The transport a request arrived through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportKind {
    #[default]
    Http,
    WebSocket,
    RSocket,
}

/// Transport metadata of a request.
///
/// For WebSocket requests, `uri`, `headers` and `remote_addr` come from the handshake and
/// `session_id` identifies the connection.
#[derive(Clone, Debug, Default)]
pub struct TransportInfo {
    pub kind: TransportKind,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub session_id: Option<String>,
}

impl TransportInfo {
    pub fn http(uri: Uri, headers: HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            kind: TransportKind::Http,
            uri,
            headers,
            remote_addr,
            session_id: None,
        }
    }

    /// Cookies sent with the request. Malformed cookies are skipped.
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| {
                Cookie::split_parse(value.to_string())
                    .filter_map(Result::ok)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie<'static>> {
        self.cookies()
            .into_iter()
            .find(|cookie| cookie.name() == name)
    }
}
