//! HTTP surface of the exporter
//!
//! ## Endpoints
//!
//! - `GET /metrics` - Prometheus text exposition of the probe registry
//! - `GET /health` - Liveness check

pub mod error;
pub mod routes;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use types::HealthResponse;

use std::net::SocketAddr;

use anyhow::Context;
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics::ProbeMetrics;

/// Parse a listen address, accepting a host-less `:port` for all interfaces
pub fn parse_listen_address(value: &str) -> Result<SocketAddr, String> {
    let value = value.trim();
    let full = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => value.to_string(),
    };

    full.parse()
        .map_err(|e| format!("invalid listen address '{value}': {e}"))
}

/// Build the router serving the given metrics
pub fn router(metrics: ProbeMetrics) -> Router {
    Router::new()
        .route("/metrics", get(routes::metrics::export))
        .route("/health", get(routes::health::health_check))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the metrics server
///
/// Binding happens before this returns, so a taken address is reported to
/// the caller. Serving runs in a background task.
/// Returns the server's local address.
pub async fn spawn_metrics_server(
    bind_addr: SocketAddr,
    metrics: ProbeMetrics,
) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind metrics server to {bind_addr}"))?;
    let addr = listener.local_addr()?;

    info!("metrics server listening on {}", addr);

    let app = router(metrics);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("metrics server error: {}", e);
        }
    });

    Ok(addr)
}
