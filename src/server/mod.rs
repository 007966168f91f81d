// Server module entry
// Owns the listener lifecycle: bind, accept loop, graceful stop

pub mod connection;
pub mod listener;
pub mod signal;

pub use listener::create_reusable_listener;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::Config;
use crate::logger;
use crate::routing::Router;

/// Errors surfaced by the server lifecycle.
#[derive(Debug)]
pub enum ServerError {
    /// The configured host and port did not parse as a socket address.
    InvalidAddress(String),
    /// The listener could not be created or bound.
    Bind(std::io::Error),
    /// The stop deadline expired with connections still in flight.
    ShutdownTimeout { active: usize },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(msg) => write!(f, "{msg}"),
            Self::Bind(err) => write!(f, "Failed to bind listener: {err}"),
            Self::ShutdownTimeout { active } => write!(
                f,
                "Shutdown deadline expired with {active} connection(s) still active"
            ),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(err) => Some(err),
            Self::InvalidAddress(_) | Self::ShutdownTimeout { .. } => None,
        }
    }
}

/// The HTTP server: configuration, a router, and the shutdown machinery
/// shared with every connection task.
pub struct Server {
    config: Config,
    router: Arc<Router>,
    local_addr: OnceLock<SocketAddr>,
    closing: AtomicBool,
    shutdown: Notify,
    active: AtomicUsize,
    drained: Notify,
}

impl Server {
    /// Create a server from its configuration and a registered router.
    pub fn new(config: Config, router: Arc<Router>) -> Self {
        Self {
            config,
            router,
            local_addr: OnceLock::new(),
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
            active: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Bind the configured address and accept connections until
    /// [`Self::stop`] is called.
    ///
    /// Each accepted connection is served on its own task; this loop only
    /// hands streams off. It returns once the accept loop exits, which is
    /// before in-flight connections have drained.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = self
            .config
            .get_socket_addr()
            .map_err(ServerError::InvalidAddress)?;
        let listener = listener::create_reusable_listener(addr).map_err(ServerError::Bind)?;
        // Resolve the port the OS picked when the config asked for port 0
        let addr = listener.local_addr().map_err(ServerError::Bind)?;
        let _ = self.local_addr.set(addr);

        logger::log_server_start(&addr, &self.config);

        loop {
            // Register for the shutdown wakeup before checking the flag so a
            // concurrent stop() is seen one way or the other.
            let shutdown = self.shutdown.notified();
            tokio::pin!(shutdown);
            shutdown.as_mut().enable();

            if self.is_closing() {
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            connection::accept_connection(self, stream, peer_addr);
                        }
                        Err(e) => {
                            logger::log_error(&format!("Failed to accept connection: {e}"));
                        }
                    }
                }
                () = &mut shutdown => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop accepting new connections and wait up to `deadline` for in-flight
    /// connections to finish.
    ///
    /// Connections that outlive the deadline keep running on their own tasks;
    /// the caller decides whether to exit the process anyway.
    pub async fn stop(&self, deadline: Duration) -> Result<(), ServerError> {
        self.closing.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        logger::log_shutdown_started();

        let drain = async {
            loop {
                // Same ordering as the accept loop: register, then check, so
                // a connection finishing in between cannot be missed.
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.active.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(deadline, drain).await {
            Ok(()) => {
                logger::log_server_stopped();
                Ok(())
            }
            Err(_) => {
                let active = self.active.load(Ordering::SeqCst);
                logger::log_warning(&format!(
                    "Shutdown deadline expired with {active} connection(s) still active"
                ));
                Err(ServerError::ShutdownTimeout { active })
            }
        }
    }

    /// Whether [`Self::stop`] has been called.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// The bound listener address, available once [`Self::start`] has bound
    /// it. Reports the port the OS picked when the configuration asked for
    /// port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Record a new in-flight connection.
    fn connection_opened(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a finished connection and wake the drain loop on the last one.
    fn connection_closed(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, LoggingConfig, PerformanceConfig, ServerConfig};
    use crate::handlers;
    use crate::http::RequestContext;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn make_config(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
                workers: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                access_log: false,
                access_log_format: "combined".to_string(),
                access_log_file: None,
                error_log_file: None,
            },
            http: HttpConfig {
                max_body_size: 10_485_760,
            },
            performance: PerformanceConfig {
                read_timeout: 5,
                write_timeout: 10,
                idle_timeout: 120,
                shutdown_timeout: 30,
            },
        }
    }

    fn make_server(host: &str, port: u16) -> Arc<Server> {
        Arc::new(Server::new(
            make_config(host, port),
            Arc::new(Router::new()),
        ))
    }

    /// Start a server on an OS-assigned port and wait for it to bind.
    async fn spawn_server(
        config: Config,
        router: Arc<Router>,
    ) -> (
        Arc<Server>,
        SocketAddr,
        tokio::task::JoinHandle<Result<(), ServerError>>,
    ) {
        let server = Arc::new(Server::new(config, router));
        let srv = Arc::clone(&server);
        let serve = tokio::spawn(async move { srv.start().await });

        let addr = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(addr) = server.local_addr() {
                    break addr;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("listener did not come up");

        (server, addr, serve)
    }

    /// Write raw bytes to the server and return everything it sends back.
    async fn send_raw_request(addr: SocketAddr, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_address() {
        let server = make_server("not a host", 8080);
        match server.start().await {
            Err(ServerError::InvalidAddress(msg)) => {
                assert!(msg.starts_with("Invalid address"));
            }
            other => panic!("expected InvalidAddress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_round_trip() {
        // Port 0 lets the OS pick a free port
        let server = make_server("127.0.0.1", 0);
        let srv = Arc::clone(&server);
        let serve = tokio::spawn(async move { srv.start().await });

        // Give the accept loop a moment to bind
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!server.is_closing());
        assert!(server.local_addr().is_some());

        server.stop(Duration::from_secs(1)).await.unwrap();
        assert!(server.is_closing());

        let result = serve.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stop_times_out_with_active_connections() {
        let server = make_server("127.0.0.1", 0);
        // Simulate a connection that never finishes
        server.connection_opened();

        match server.stop(Duration::from_millis(50)).await {
            Err(ServerError::ShutdownTimeout { active }) => assert_eq!(active, 1),
            other => panic!("expected ShutdownTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_waits_for_last_connection() {
        let server = make_server("127.0.0.1", 0);
        server.connection_opened();

        let srv = Arc::clone(&server);
        let finisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            srv.connection_closed();
        });

        server.stop(Duration::from_secs(1)).await.unwrap();
        finisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_exits_immediately() {
        let server = make_server("127.0.0.1", 0);
        server.stop(Duration::from_millis(50)).await.unwrap();

        // The accept loop must observe the closed flag and exit
        let srv = Arc::clone(&server);
        let serve = tokio::spawn(async move { srv.start().await });
        let result = tokio::time::timeout(Duration::from_secs(1), serve)
            .await
            .expect("start did not observe stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_request_reaches_handler_over_the_wire() {
        let router = Arc::new(Router::new());
        handlers::register_routes(&router);
        let (server, addr, serve) = spawn_server(make_config("127.0.0.1", 0), router).await;

        let response = send_raw_request(
            addr,
            b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
        assert!(
            response.contains(r#""service":"tinyserve""#),
            "got: {response}"
        );

        server.stop(Duration::from_secs(1)).await.unwrap();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_body_yields_400_without_routing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Arc::new(Router::new());
        let counter = Arc::clone(&hits);
        router.post("/users", move |ctx: &mut RequestContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.status(hyper::StatusCode::CREATED);
        });
        let (server, addr, serve) = spawn_server(make_config("127.0.0.1", 0), router).await;

        // A bogus chunk-size line makes the body unreadable after the
        // headers have already been accepted
        let response = send_raw_request(
            addr,
            b"POST /users HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\nZZZ\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 400"), "got: {response}");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        server.stop(Duration::from_secs(1)).await.unwrap();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_body_yields_413_without_routing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Arc::new(Router::new());
        let counter = Arc::clone(&hits);
        router.post("/users", move |ctx: &mut RequestContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.status(hyper::StatusCode::CREATED);
        });

        let mut config = make_config("127.0.0.1", 0);
        config.http.max_body_size = 64;
        let (server, addr, serve) = spawn_server(config, router).await;

        let response = send_raw_request(
            addr,
            b"POST /users HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 413"), "got: {response}");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        server.stop(Duration::from_secs(1)).await.unwrap();
        serve.await.unwrap().unwrap();
    }
}
