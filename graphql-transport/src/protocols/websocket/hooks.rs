use tower::BoxError;

use super::CloseCode;
use super::SessionInfo;
use crate::json_ext::Object;

/// Callbacks around the lifecycle of a WebSocket connection.
///
/// Every method has a default: accept every connection without an acknowledgement payload, and
/// ignore cancellations and closes.
#[async_trait::async_trait]
pub trait ConnectionHooks: Send + Sync + 'static {
    /// Decide whether to accept a connection from its `connection_init` payload.
    ///
    /// `Ok` acknowledges the connection, with the returned payload if any. `Err` closes the
    /// connection with `4403 Forbidden`. Values stored in [`SessionInfo::attributes`] are visible
    /// to every operation of the connection.
    async fn connection_init(
        &self,
        _session: &SessionInfo,
        _payload: Option<&Object>,
    ) -> Result<Option<Object>, BoxError> {
        Ok(None)
    }

    /// The client cancelled an operation.
    async fn subscription_cancelled(&self, _session: &SessionInfo, _id: &str) {}

    /// The connection is gone. Every operation has been cancelled at that point.
    async fn connection_closed(&self, _session: &SessionInfo, _code: CloseCode) {}
}

/// Hooks accepting every connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl ConnectionHooks for AcceptAll {}
