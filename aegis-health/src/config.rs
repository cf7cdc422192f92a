//! Health check configuration

use serde::Deserialize;

/// Configuration for the health report and its HTTP endpoints
///
/// ```ron
/// health: (
///     enabled: true,
///     listen_address: "127.0.0.1:8080",
///     max_queue_size: 5000,
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthConfig {
    /// Serve the health endpoints from the worker process.
    ///
    /// The report is always available through `aegis health`; this only
    /// controls the HTTP server.
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the health check server
    ///
    /// Common values:
    /// - `[::]:8080` (IPv6 any address, port 8080)
    /// - `0.0.0.0:8080` (IPv4 any address, port 8080)
    /// - `127.0.0.1:8080` (localhost only, port 8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Queue backlog (jobs in any state) above which the report is degraded
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_max_queue_size() -> usize {
    10000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: default_listen_address(),
            max_queue_size: default_max_queue_size(),
        }
    }
}
