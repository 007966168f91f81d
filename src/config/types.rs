// Configuration types module
// Defines all configuration-related data structures

use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub performance: PerformanceConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub access_log: bool,
    /// Access log format (combined, common, or json)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    /// Access log file path (optional, stdout if not set)
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// HTTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Largest request body accepted, in bytes. Requests declaring a bigger
    /// Content-Length are rejected with 413 before the body is read.
    pub max_body_size: u64,
}

/// Performance configuration, all values in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub idle_timeout: u64,
    pub shutdown_timeout: u64,
}

impl PerformanceConfig {
    /// Lifetime budget for a single connection.
    ///
    /// hyper's http1 connection exposes no per-read or per-write deadline,
    /// so reads, writes, and keep-alive idle share one budget: whichever is
    /// larger of the idle timeout and the combined read/write timeouts.
    pub const fn connection_deadline(&self) -> Duration {
        let request_budget = self.read_timeout.saturating_add(self.write_timeout);
        if self.idle_timeout > request_budget {
            Duration::from_secs(self.idle_timeout)
        } else {
            Duration::from_secs(request_budget)
        }
    }

    /// Grace period granted to in-flight connections during shutdown.
    pub const fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}
