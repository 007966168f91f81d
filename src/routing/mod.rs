//! Routing module
//!
//! Provides the exact-match routing core:
//! - Concurrency-safe route registration per (method, path)
//! - Lookup and dispatch into a request context
//! - 404 for every unmatched request, with no 405 distinction

mod router;

pub use router::{Handler, Router};
