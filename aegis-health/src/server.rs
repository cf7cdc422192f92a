//! Health check HTTP server

use std::{net::SocketAddr, sync::Arc, time::Duration};

use aegis_common::Signal;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{HealthChecker, HealthConfig, HealthError};

/// Health check HTTP server
///
/// Serves `/health/live`, `/health/ready` and the full JSON report on
/// `/health`.
pub struct HealthServer {
    listener: TcpListener,
    router: Router,
}

impl HealthServer {
    /// Bind the health server
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(
        config: &HealthConfig,
        health_checker: Arc<HealthChecker>,
    ) -> Result<Self, HealthError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| HealthError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "Health check server bound successfully"
        );

        let router = Router::new()
            .route("/health", get(report_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(health_checker)
            // Directory probes must not hang a prober
            .layer(TimeoutLayer::new(Duration::from_secs(2)));

        Ok(Self { listener, router })
    }

    /// The address actually bound, useful with port 0
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the health server until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HealthError> {
        tracing::info!("Health check server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Health check server received shutdown signal");
            })
            .await
            .map_err(|e| HealthError::ServerError(e.to_string()))?;

        tracing::info!("Health check server stopped");
        Ok(())
    }
}

async fn liveness_handler(State(health_checker): State<Arc<HealthChecker>>) -> Response {
    if health_checker.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

/// 200 unless a check is unhealthy; the report is attached on failure
async fn readiness_handler(State(health_checker): State<Arc<HealthChecker>>) -> Response {
    let report = health_checker.report().await;

    if report.is_ready() {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!(status = ?report.status, "Readiness probe failed");
        (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response()
    }
}

/// 200 when healthy, 503 otherwise
async fn report_handler(State(health_checker): State<Arc<HealthChecker>>) -> Response {
    let report = health_checker.report().await;

    let status = if report.status == crate::HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report)).into_response()
}
