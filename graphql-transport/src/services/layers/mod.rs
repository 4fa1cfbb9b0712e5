//! Layers applied to every execution, whatever the transport.

pub(crate) mod ensure_query_presence;
