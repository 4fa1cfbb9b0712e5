//! Built-in interceptors.

pub mod authentication;

#[cfg(test)]
pub(crate) mod test;
