//! axum endpoints for a [`Pipeline`]: GraphQL over HTTP (with Server-Sent Events and multipart
//! subscriptions) and the WebSocket handshake.

mod content_negotiation;
mod handlers;
mod websocket;

use axum::Router;
use axum::routing::MethodRouter;
use axum::routing::get;
use axum::routing::post;
use tower_http::trace::TraceLayer;

use crate::pipeline::Pipeline;

/// The routes of the configured endpoints. When HTTP and WebSocket share a path, `POST` serves
/// HTTP and `GET` the WebSocket upgrade.
pub(crate) fn make_axum_router(pipeline: Pipeline) -> Router {
    let configuration = pipeline.configuration().clone();
    let http_route: MethodRouter<Pipeline> = post(handlers::handle_post);

    let router = if !configuration.websocket.enabled {
        Router::new().route(&configuration.http.path, http_route)
    } else if configuration.websocket.path == configuration.http.path {
        Router::new().route(
            &configuration.http.path,
            http_route.get(websocket::handle_upgrade),
        )
    } else {
        Router::new()
            .route(&configuration.http.path, http_route)
            .route(
                &configuration.websocket.path,
                get(websocket::handle_upgrade),
            )
    };

    router
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}
