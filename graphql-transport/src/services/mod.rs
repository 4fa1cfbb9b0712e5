//! Implementation of the various steps in the execution pipeline.

pub mod execution;
pub(crate) mod execution_service;
pub(crate) mod layers;
pub mod transport;

pub use execution::ExecutionResult;
pub use execution_service::ExecutionService;
pub use transport::TransportInfo;
pub use transport::TransportKind;
