//! tinyserve: a small HTTP/1.1 server built on tokio and hyper
//!
//! Requests are matched by exact method and path against a [`routing::Router`],
//! and handlers write their response through an [`http::RequestContext`].
//! [`server::Server`] owns the listener lifecycle, including graceful stop.

pub mod config;
pub mod handlers;
pub mod http;
pub mod logger;
pub mod routing;
pub mod server;
