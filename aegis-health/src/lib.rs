//! Health reporting for the Aegis dispatch pipeline
//!
//! [`HealthChecker::report`] probes the queue, its storage, the worker's pid
//! file and the ledger directory. The same report backs the `aegis health`
//! command and, when enabled, an HTTP server inside the worker process.
//!
//! # Endpoints
//!
//! - **`/health/live`** - 200 while the process answers
//! - **`/health/ready`** - 200 unless a check is unhealthy
//! - **`/health`** - the full JSON report; 200 only when every check is healthy
//!
//! # Usage
//!
//! ```rust,no_run
//! use aegis_health::{HealthChecker, HealthConfig, HealthServer};
//! use aegis_ledger::DeliveryLedger;
//! use aegis_queue::MemoryQueue;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HealthConfig {
//!     enabled: true,
//!     listen_address: "127.0.0.1:8080".to_string(),
//!     max_queue_size: 10000,
//! };
//!
//! let ledger = DeliveryLedger::open("/var/lib/aegis/delivery/failed")?;
//! let checker = HealthChecker::new(Arc::new(MemoryQueue::new()), ledger, config.max_queue_size)
//!     .with_pid_file("/run/aegis/aegis.pid");
//! let server = HealthServer::new(&config, Arc::new(checker)).await?;
//!
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod checker;
mod config;
mod error;
mod server;

pub use checker::{Check, CheckStatus, Checks, HealthChecker, HealthReport, HealthStatus};
pub use config::HealthConfig;
pub use error::HealthError;
pub use server::HealthServer;
