//! Assembles an engine, interceptors and transports into a [`Pipeline`].

use std::sync::Arc;

use displaydoc::Display;
use thiserror::Error;
use tower::ServiceBuilder;
use tracing::info_span;

use crate::Configuration;
use crate::axum_factory::make_axum_router;
use crate::configuration::ConfigurationError;
use crate::engine::GraphQlEngine;
use crate::interceptor::Interceptor;
use crate::interceptor::InterceptorChain;
use crate::layers::ServiceBuilderExt;
use crate::propagation::ContextPropagator;
use crate::protocols::websocket::AcceptAll;
use crate::protocols::websocket::ConnectionHooks;
use crate::protocols::websocket::SessionInfo;
use crate::protocols::websocket::WebSocketSession;
use crate::rsocket::RSocketHandler;
use crate::services::ExecutionService;
use crate::services::execution;
use crate::services::layers::ensure_query_presence::EnsureQueryPresence;

/// Error raised while building a [`Pipeline`].
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum PipelineError {
    /// no GraphQL engine was given
    MissingEngine,
    /// invalid configuration: {0}
    Configuration(#[from] ConfigurationError),
}

/// An engine behind its interceptor chain, ready to be served over every transport.
///
/// ```rust
/// # use graphql_transport::Pipeline;
/// # use graphql_transport::engine::{engine_fn, ExecutionOutcome};
/// # use graphql_transport::graphql;
/// # async fn serve() -> Result<(), tower::BoxError> {
/// let pipeline = Pipeline::builder()
///     .engine(engine_fn(|_input| async {
///         Ok(ExecutionOutcome::Value(graphql::Response::default()))
///     }))
///     .build()?;
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:4000").await?;
/// axum::serve(listener, pipeline.router()).await?;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    service: execution::BoxCloneService,
    propagators: Arc<[Arc<dyn ContextPropagator>]>,
    hooks: Arc<dyn ConnectionHooks>,
    configuration: Arc<Configuration>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The assembled chain: a `graphql_request` span, the interceptors in the order they were
    /// added, the query presence check and the engine.
    pub fn service(&self) -> execution::BoxCloneService {
        self.service.clone()
    }

    /// HTTP and WebSocket endpoints, as configured.
    ///
    /// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` to expose the remote
    /// address of clients.
    pub fn router(&self) -> axum::Router {
        make_axum_router(self.clone())
    }

    pub fn rsocket_handler(&self) -> RSocketHandler {
        RSocketHandler::new(self.service.clone(), self.propagators.clone())
    }

    /// A graphql-ws session for a connection accepted outside of [`Pipeline::router`].
    pub fn websocket_session(&self, info: SessionInfo) -> WebSocketSession {
        WebSocketSession::new(
            info,
            self.service.clone(),
            self.hooks.clone(),
            self.propagators.clone(),
            self.configuration.websocket.clone(),
        )
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub(crate) fn propagators(&self) -> &[Arc<dyn ContextPropagator>] {
        &self.propagators
    }
}

/// Builder for a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    engine: Option<Arc<dyn GraphQlEngine>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    propagators: Vec<Arc<dyn ContextPropagator>>,
    hooks: Option<Arc<dyn ConnectionHooks>>,
    configuration: Option<Configuration>,
}

// Not using buildstructor because the trait object setters take any implementation
impl PipelineBuilder {
    /// The engine executing the operations. Required.
    pub fn engine(mut self, engine: impl GraphQlEngine) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    /// Adds an interceptor.
    ///
    /// May be called multiple times. The first interceptor added is the outermost one.
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Adds shared interceptors, after the ones already added.
    pub fn interceptors(
        mut self,
        interceptors: impl IntoIterator<Item = Arc<dyn Interceptor>>,
    ) -> Self {
        self.interceptors.extend(interceptors);
        self
    }

    /// Adds a context propagator. May be called multiple times.
    pub fn propagator(mut self, propagator: impl ContextPropagator) -> Self {
        self.propagators.push(Arc::new(propagator));
        self
    }

    /// Hooks for WebSocket connections. Every connection is accepted when none are given.
    pub fn connection_hooks(mut self, hooks: impl ConnectionHooks) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// The transport configuration. The default configuration is used when none is given.
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let engine = self.engine.ok_or(PipelineError::MissingEngine)?;
        let configuration = self.configuration.unwrap_or_default();
        configuration.validate()?;
        let propagators: Arc<[Arc<dyn ContextPropagator>]> = self.propagators.into();

        let terminal = ServiceBuilder::new()
            .layer(EnsureQueryPresence::default())
            .service(ExecutionService::new(engine, propagators.iter().cloned()));
        let chain = InterceptorChain::new(&self.interceptors, terminal);
        let service = ServiceBuilder::new()
            .instrument(|request: &execution::Request| {
                info_span!(
                    "graphql_request",
                    graphql.id = %request.id(),
                    graphql.operation_name = request.body.operation_name.as_deref().unwrap_or_default(),
                    transport = ?request.transport.kind,
                )
            })
            .service(chain);

        Ok(Pipeline {
            service: execution::BoxCloneService::new(service),
            propagators,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(AcceptAll)),
            configuration: Arc::new(configuration),
        })
    }
}
