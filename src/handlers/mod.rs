//! Built-in route handlers
//!
//! The endpoints served by the default router: a health check and a tiny
//! in-memory user listing.

use hyper::StatusCode;
use serde::{Deserialize, Serialize};

use crate::http::RequestContext;
use crate::routing::Router;

/// Service name reported by the health endpoint.
const SERVICE_NAME: &str = "tinyserve";

/// A user record returned by the users endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    service: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: &'static str,
}

/// Report service liveness.
pub fn health_check(ctx: &mut RequestContext) {
    ctx.json(
        StatusCode::OK,
        &HealthStatus {
            status: "ok",
            service: SERVICE_NAME,
        },
    );
}

/// List the demo users.
pub fn list_users(ctx: &mut RequestContext) {
    let users = vec![
        User {
            id: 1,
            name: "Hanzala".to_string(),
        },
        User {
            id: 2,
            name: "Areeb".to_string(),
        },
    ];
    ctx.json(StatusCode::OK, &users);
}

/// Acknowledge a user creation request.
///
/// Nothing is stored; the endpoint exists to exercise a POST route.
pub fn create_user(ctx: &mut RequestContext) {
    ctx.json(
        StatusCode::CREATED,
        &StatusMessage {
            status: "user created successfully",
        },
    );
}

/// Register every built-in route on the router.
pub fn register_routes(router: &Router) {
    router.get("/health", health_check);
    router.get("/users", list_users);
    router.post("/users", create_user);
}
