pub(crate) mod common;
pub(crate) use common::TestServer;

mod http;
mod websocket;
