//! Prometheus scrape endpoint

use axum::{extract::State, http::header, response::IntoResponse};

use crate::api::ApiResult;
use crate::metrics::ProbeMetrics;

/// GET /metrics
pub async fn export(State(metrics): State<ProbeMetrics>) -> ApiResult<impl IntoResponse> {
    let (content_type, body) = metrics.encode()?;
    Ok(([(header::CONTENT_TYPE, content_type)], body))
}
