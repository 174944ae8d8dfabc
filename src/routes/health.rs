//! Health check endpoint
//!
//! Liveness probe: returns 200 while the process is serving, with the store
//! backend and batch tuning for operators.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    /// Record store backend name
    pub backend: &'static str,
    pub membership_strategy: String,
    pub sub_batch_size: usize,
    pub timestamp: String,
}

/// Handle liveness probe (/health)
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let runtime = &state.runtime;

    json_response(
        StatusCode::OK,
        &HealthResponse {
            healthy: true,
            version: env!("CARGO_PKG_VERSION"),
            uptime: state.started_at.elapsed().as_secs(),
            backend: runtime.backend(),
            membership_strategy: runtime.config.membership_strategy.to_string(),
            sub_batch_size: runtime.config.sub_batch_size,
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
}
