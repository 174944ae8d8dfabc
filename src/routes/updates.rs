//! Update endpoints
//!
//! - `POST /students/{id}/update` - single-record update
//! - `POST /batch-update` - batch update with per-item results

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderMap;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{caller_from_headers, error_response, json_response, parse_body};
use crate::engine::{BatchTarget, MutationDescriptor};
use crate::server::AppState;

/// Body of `POST /batch-update`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    pub target: BatchTarget,
    pub mutation: MutationDescriptor,
}

pub async fn handle_student_update(
    state: &AppState,
    student_id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let mutation: MutationDescriptor = match parse_body(body) {
        Ok(m) => m,
        Err(response) => return response,
    };
    let caller = caller_from_headers(headers);

    match state
        .runtime
        .engine
        .apply_student_update(student_id, &mutation, &caller)
        .await
    {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(e) => {
            debug!(student_id = %student_id, error = %e, "Student update rejected");
            error_response(&e)
        }
    }
}

pub async fn handle_batch_update(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let request: BatchUpdateRequest = match parse_body(body) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let caller = caller_from_headers(headers);

    match state
        .runtime
        .engine
        .apply_batch_update(&request.target, &request.mutation, &caller)
        .await
    {
        Ok(outcome) => json_response(StatusCode::OK, &outcome),
        Err(e) => {
            debug!(error = %e, "Batch update rejected");
            error_response(&e)
        }
    }
}
