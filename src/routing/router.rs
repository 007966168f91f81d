//! Exact-match router module
//!
//! Owns the route table: HTTP method name to literal path to handler.
//! Registration takes the write lock; dispatch takes the read lock for the
//! lookup only and invokes the matched handler after the guard is dropped.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response};

use crate::http::{self, RequestContext};
use crate::logger;

/// A registered route handler
///
/// Handlers are opaque function values: they receive the request context,
/// write a response through it, and return nothing.
pub type Handler = Arc<dyn Fn(&mut RequestContext) + Send + Sync>;

/// Method name -> exact path -> handler
type RouteTable = HashMap<String, HashMap<String, Handler>>;

/// Concurrency-safe registry of exact-match routes
///
/// Shared behind an `Arc` between the registration phase and every
/// in-flight dispatch. Entries are only ever inserted or replaced, never
/// removed.
pub struct Router {
    routes: RwLock<RouteTable>,
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite the handler for `(method, path)`
    ///
    /// Method and path are taken verbatim: no validation, no normalization,
    /// and the method comparison at dispatch time is case-sensitive.
    /// Registering the same pair again silently replaces the old handler.
    pub fn register<H>(&self, method: &str, path: &str, handler: H)
    where
        H: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes
            .entry(method.to_string())
            .or_default()
            .insert(path.to_string(), Arc::new(handler));
        logger::log_route_registered(method, path);
    }

    /// Register a handler for GET `path`
    pub fn get<H>(&self, path: &str, handler: H)
    where
        H: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        self.register("GET", path, handler);
    }

    /// Register a handler for POST `path`
    pub fn post<H>(&self, path: &str, handler: H)
    where
        H: Fn(&mut RequestContext) + Send + Sync + 'static,
    {
        self.register("POST", path, handler);
    }

    /// Transport-facing entry point: look up and run the handler for `request`
    ///
    /// Unknown method, unknown path, and a known path under the wrong
    /// method are indistinguishable: all three produce 404, never 405.
    /// A miss is a normal outcome and is not logged here.
    pub fn dispatch(&self, request: Request<Bytes>) -> Response<Full<Bytes>> {
        // Copy the handler out so the read lock is not held while it runs.
        let handler = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            routes
                .get(request.method().as_str())
                .and_then(|paths| paths.get(request.uri().path()))
                .cloned()
        };

        match handler {
            Some(handler) => {
                let mut ctx = RequestContext::new(request);
                handler(&mut ctx);
                ctx.into_response()
            }
            None => http::build_404_response(),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_request(method: &str, path: &str) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Bytes::new())
            .unwrap()
    }

    fn counting_handler(hits: &Arc<AtomicUsize>) -> impl Fn(&mut RequestContext) + Send + Sync {
        let hits = Arc::clone(hits);
        move |ctx: &mut RequestContext| {
            hits.fetch_add(1, Ordering::SeqCst);
            ctx.status(StatusCode::OK);
        }
    }

    #[test]
    fn test_dispatch_invokes_registered_handler_exactly_once() {
        let router = Router::new();
        let health_hits = Arc::new(AtomicUsize::new(0));
        let user_hits = Arc::new(AtomicUsize::new(0));
        router.get("/health", counting_handler(&health_hits));
        router.get("/users", counting_handler(&user_hits));

        let response = router.dispatch(make_request("GET", "/health"));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(health_hits.load(Ordering::SeqCst), 1);
        assert_eq!(user_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_unknown_method_returns_404() {
        let router = Router::new();
        router.get("/health", |ctx: &mut RequestContext| {
            ctx.status(StatusCode::OK);
        });

        let response = router.dispatch(make_request("DELETE", "/health"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_dispatch_unknown_path_returns_404() {
        let router = Router::new();
        router.get("/health", |ctx: &mut RequestContext| {
            ctx.status(StatusCode::OK);
        });

        let response = router.dispatch(make_request("GET", "/non-existent-route"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_dispatch_wrong_method_returns_404_not_405() {
        let router = Router::new();
        router.post("/users", |ctx: &mut RequestContext| {
            ctx.status(StatusCode::CREATED);
        });

        let response = router.dispatch(make_request("GET", "/users"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_dispatch_matches_exact_path_only() {
        let router = Router::new();
        router.get("/about", |ctx: &mut RequestContext| {
            ctx.status(StatusCode::OK);
        });

        assert_eq!(
            router.dispatch(make_request("GET", "/about")).status(),
            StatusCode::OK
        );
        // No trailing-slash normalization, no prefix matching
        assert_eq!(
            router.dispatch(make_request("GET", "/about/")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            router.dispatch(make_request("GET", "/about/team")).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_dispatch_ignores_query_string() {
        let router = Router::new();
        router.get("/users", |ctx: &mut RequestContext| {
            ctx.status(StatusCode::OK);
        });

        let response = router.dispatch(make_request("GET", "/users?page=1"));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_method_match_is_case_sensitive() {
        let router = Router::new();
        router.register("get", "/health", |ctx: &mut RequestContext| {
            ctx.status(StatusCode::OK);
        });

        // Registered under lowercase "get"; a standard GET does not match
        assert_eq!(
            router.dispatch(make_request("GET", "/health")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            router.dispatch(make_request("get", "/health")).status(),
            StatusCode::OK
        );
    }

    #[test]
    fn test_register_overwrites_previous_handler() {
        let router = Router::new();
        let first_hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::new(AtomicUsize::new(0));
        router.get("/health", counting_handler(&first_hits));
        router.get("/health", counting_handler(&second_hits));

        let response = router.dispatch(make_request("GET", "/health"));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_response_flows_through_dispatch() {
        let router = Router::new();
        router.get("/health", |ctx: &mut RequestContext| {
            ctx.json(
                StatusCode::OK,
                &serde_json::json!({"status": "ok", "service": "test"}),
            );
        });

        let response = router.dispatch(make_request("GET", "/health"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_handler_may_register_routes_mid_dispatch() {
        let router = Arc::new(Router::new());
        let inner = Arc::clone(&router);
        router.get("/outer", move |ctx: &mut RequestContext| {
            // Would deadlock if dispatch still held the read lock here
            inner.get("/inner", |ctx: &mut RequestContext| {
                ctx.status(StatusCode::CREATED);
            });
            ctx.status(StatusCode::OK);
        });

        assert_eq!(
            router.dispatch(make_request("GET", "/outer")).status(),
            StatusCode::OK
        );
        assert_eq!(
            router.dispatch(make_request("GET", "/inner")).status(),
            StatusCode::CREATED
        );
    }

    #[test]
    fn test_concurrent_registration_and_dispatch() {
        let router = Arc::new(Router::new());
        router.get("/stable", |ctx: &mut RequestContext| {
            ctx.status(StatusCode::OK);
        });

        let mut workers = Vec::new();
        for worker in 0..8 {
            let router = Arc::clone(&router);
            workers.push(std::thread::spawn(move || {
                for n in 0..50 {
                    router.register(
                        "GET",
                        &format!("/dynamic/{worker}/{n}"),
                        |ctx: &mut RequestContext| {
                            ctx.status(StatusCode::OK);
                        },
                    );
                    let response = router.dispatch(make_request("GET", "/stable"));
                    assert_eq!(response.status(), StatusCode::OK);
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        // No registration was lost under contention
        for worker in 0..8 {
            for n in 0..50 {
                let path = format!("/dynamic/{worker}/{n}");
                let response = router.dispatch(make_request("GET", &path));
                assert_eq!(response.status(), StatusCode::OK, "missing route {path}");
            }
        }
    }
}
