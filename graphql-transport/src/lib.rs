//! GraphQL over HTTP, Server-Sent Events, multipart subscriptions, WebSocket (graphql-ws) and
//! RSocket, in front of any GraphQL engine.
//!
//! A [`Pipeline`] wraps a [`engine::GraphQlEngine`] with an ordered chain of
//! [`interceptor::Interceptor`]s. Every transport normalizes what it receives into an
//! [`services::execution::Request`], runs it through the same chain, and renders the
//! [`services::execution::Response`] the way its protocol expects.

#![warn(unreachable_pub)]

pub mod json_ext;

mod axum_factory;
pub mod configuration;
mod context;
pub mod engine;
pub mod error;
pub mod graphql;
pub mod interceptor;
pub mod layers;
pub mod pipeline;
pub mod plugins;
pub mod propagation;
pub mod protocols;
pub mod rsocket;
pub mod services;

pub use configuration::Configuration;
pub use context::CONNECTION_INIT_PAYLOAD;
pub use context::Context;
pub use context::ExtensionsGuard;
pub use context::ExtensionsMutex;
pub use pipeline::Pipeline;
pub use pipeline::PipelineBuilder;
pub use pipeline::PipelineError;
