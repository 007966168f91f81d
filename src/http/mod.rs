//! HTTP protocol layer module
//!
//! Provides HTTP protocol-related base functionality, decoupled from
//! specific business logic: the per-request context handed to handlers and
//! the shared status-response builders.

pub mod context;
pub mod response;

// Re-export commonly used types
pub use context::RequestContext;
pub use response::{build_400_response, build_404_response, build_413_response};
