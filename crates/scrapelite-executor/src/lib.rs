//! Request-level orchestration: one [`ExecutionRequest`] in, one
//! [`ResultEnvelope`] out.
//!
//! [`ExecutionRequest`]: scrapelite_core::protocol::ExecutionRequest
//! [`ResultEnvelope`]: scrapelite_core::protocol::ResultEnvelope

pub mod coordinator;

pub use coordinator::{ExecutionCoordinator, ExecutorSettings};
