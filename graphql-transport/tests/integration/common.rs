use std::net::SocketAddr;
use std::time::Duration;

use futures::stream;
use graphql_transport::Pipeline;
use graphql_transport::engine::ExecutionInput;
use graphql_transport::engine::ExecutionOutcome;
use graphql_transport::engine::engine_fn;
use graphql_transport::graphql;
use graphql_transport::plugins::authentication::AuthenticatingConnectionHooks;
use graphql_transport::plugins::authentication::Authentication;
use graphql_transport::plugins::authentication::AuthenticationProvider;
use graphql_transport::plugins::authentication::Principal;
use serde_json_bytes::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::BoxError;

/// Accepts the `valid` token only, as `alice`.
pub(crate) struct StaticToken;

#[async_trait::async_trait]
impl AuthenticationProvider for StaticToken {
    async fn authenticate(&self, token: &str) -> Result<Principal, BoxError> {
        if token == "valid" {
            Ok(Principal::new("alice"))
        } else {
            Err("unknown token".into())
        }
    }
}

/// A toy engine understanding three operations:
///
/// * `query Add($a: Int, $b: Int) { add(a: $a, b: $b) }`, matched on `add`
/// * `{ whoami }`, the name of the authenticated principal
/// * `subscription { count }`, counting from 1 to 3
fn execute(input: ExecutionInput) -> ExecutionOutcome {
    let document = input.document.trim_start();
    if document.starts_with("subscription") {
        return ExecutionOutcome::stream(stream::iter((1..=3).map(|count| {
            Ok(graphql::Response::builder()
                .data(json!({ "count": count }))
                .build())
        })));
    }

    if document.contains("whoami") {
        let name = Principal::from_context(&input.context).map(|principal| principal.name);
        return graphql::Response::builder()
            .data(json!({ "whoami": name }))
            .build()
            .into();
    }

    if document.contains("add") {
        let operand = |name: &str| input.variables.get(name).and_then(|value| value.as_i64());
        return match (operand("a"), operand("b")) {
            (Some(a), Some(b)) => graphql::Response::builder()
                .data(json!({ "add": a + b }))
                .build()
                .into(),
            _ => graphql::Response::builder()
                .error(
                    graphql::Error::builder()
                        .message("add expects two integers")
                        .extension_code("GRAPHQL_VALIDATION_FAILED")
                        .build(),
                )
                .build()
                .into(),
        };
    }

    graphql::Response::builder()
        .error(
            graphql::Error::builder()
                .message(format!("cannot execute {document}"))
                .extension_code("GRAPHQL_VALIDATION_FAILED")
                .build(),
        )
        .build()
        .into()
}

/// The pipeline served by the tests: optional bearer authentication over HTTP, and over
/// WebSocket at `connection_init`.
pub(crate) fn pipeline() -> Pipeline {
    Pipeline::builder()
        .engine(engine_fn(|input| async move { Ok(execute(input)) }))
        .interceptor(Authentication::new(StaticToken))
        .connection_hooks(AuthenticatingConnectionHooks::new(StaticToken))
        .build()
        .expect("valid pipeline")
}

/// A pipeline served on a random local port, until dropped.
pub(crate) struct TestServer {
    address: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start() -> Self {
        Self::start_with(pipeline()).await
    }

    pub(crate) async fn start_with(pipeline: Pipeline) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("cannot bind a local port");
        let address = listener.local_addr().expect("no local address");
        let app = pipeline
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server failed");
        });
        Self { address, handle }
    }

    pub(crate) fn http_url(&self) -> String {
        format!("http://{}/graphql", self.address)
    }

    pub(crate) fn ws_url(&self) -> String {
        format!("ws://{}/graphql", self.address)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Bounds every wait on the server, so a protocol bug fails the test instead of hanging it.
pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);
