// Connection handling
// Serves one TCP connection per task and feeds its requests to the router

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderName, CONTENT_LENGTH, REFERER, USER_AGENT};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, Version};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use super::Server;
use crate::http;
use crate::logger::{self, AccessLogEntry};

/// Hand an accepted stream off to its own connection task.
pub fn accept_connection(server: &Arc<Server>, stream: TcpStream, peer_addr: SocketAddr) {
    server.connection_opened();

    if server.config.logging.access_log {
        logger::log_connection_accepted(&peer_addr);
    }

    handle_connection(Arc::clone(server), stream, peer_addr);
}

/// Serve a single connection in a spawned task.
///
/// The whole connection runs under one deadline derived from the configured
/// timeouts, since hyper's HTTP/1 connection exposes no per-operation timers.
/// Once the server starts closing, the connection finishes its in-flight
/// request and stops accepting new ones.
fn handle_connection(server: Arc<Server>, stream: TcpStream, peer_addr: SocketAddr) {
    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let deadline = server.config.performance.connection_deadline();

        let mut builder = http1::Builder::new();
        builder.keep_alive(server.config.performance.idle_timeout > 0);

        let service_server = Arc::clone(&server);
        let conn = builder.serve_connection(
            io,
            service_fn(move |req| {
                let server = Arc::clone(&service_server);
                async move { handle_request(req, peer_addr, server).await }
            }),
        );
        tokio::pin!(conn);

        let served = async {
            // Register for the shutdown wakeup before checking the flag so a
            // concurrent stop() is seen one way or the other.
            let shutdown = server.shutdown.notified();
            tokio::pin!(shutdown);
            shutdown.as_mut().enable();

            if server.is_closing() {
                conn.as_mut().graceful_shutdown();
            }

            tokio::select! {
                result = conn.as_mut() => result,
                () = &mut shutdown => {
                    // Finish the in-flight request, then close
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            }
        };

        match tokio::time::timeout(deadline, served).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => logger::log_connection_error(&err),
            Err(_) => {
                logger::log_warning(&format!(
                    "Connection from {peer_addr} exceeded its {}s budget, closing",
                    deadline.as_secs()
                ));
            }
        }

        server.connection_closed();
    });
}

/// Run one request through the router and write its access log line.
///
/// The body is collected up front so handlers see a complete byte buffer.
/// A body declaring more than the configured cap is refused with a 413
/// before any of it is read; one that fails to arrive yields a 400. Neither
/// case touches the router.
async fn handle_request(
    req: Request<Incoming>,
    peer_addr: SocketAddr,
    server: Arc<Server>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();

    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let http_version = version_string(req.version()).to_string();
    let referer = header_string(req.headers(), REFERER);
    let user_agent = header_string(req.headers(), USER_AGENT);

    let response = if let Some(rejected) =
        check_body_size(req.headers(), server.config.http.max_body_size)
    {
        rejected
    } else {
        let (parts, body) = req.into_parts();
        match body.collect().await {
            Ok(collected) => {
                let request = Request::from_parts(parts, collected.to_bytes());
                server.router.dispatch(request)
            }
            Err(err) => {
                logger::log_error(&format!("Failed to read request body: {err}"));
                http::build_400_response()
            }
        }
    };

    if server.config.logging.access_log {
        let mut entry = AccessLogEntry::new(peer_addr.ip().to_string(), method, path);
        entry.query = query;
        entry.http_version = http_version;
        entry.status = response.status().as_u16();
        entry.body_bytes = usize::try_from(response.body().size_hint().exact().unwrap_or(0))
            .unwrap_or(usize::MAX);
        entry.referer = referer;
        entry.user_agent = user_agent;
        entry.request_time_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &server.config.logging.access_log_format);
    }

    Ok(response)
}

/// Validate the declared Content-Length against the configured cap.
///
/// Returns the 413 response to send when the declared size is over the
/// limit. Absent or unparseable values skip the check; the connection
/// deadline still bounds how long such a body may trickle in.
fn check_body_size(headers: &HeaderMap, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let declared = header_string(headers, CONTENT_LENGTH)?;
    match declared.parse::<u64>() {
        Ok(size) if size > max_body_size => {
            logger::log_error(&format!(
                "Request body too large: {size} bytes (max: {max_body_size})"
            ));
            Some(http::build_413_response())
        }
        Err(_) => {
            logger::log_warning(&format!(
                "Invalid Content-Length value: '{declared}', skipping size check"
            ));
            None
        }
        _ => None,
    }
}

/// Render the HTTP version the way access log formats expect it.
fn version_string(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        _ => "1.1",
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
