//! JSON bodies served next to the metrics

use serde::{Deserialize, Serialize};

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    /// Exporter version
    pub version: String,
    /// RFC 3339 time the response was generated
    pub timestamp: String,
}
