pub(crate) mod multipart;
pub(crate) mod sse;
pub mod websocket;
