//! Liveness endpoint for process supervisors

use axum::Json;
use chrono::Utc;

use crate::api::types::HealthResponse;

/// GET /health
///
/// Says nothing about the brokers; their state is in `/metrics`.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
