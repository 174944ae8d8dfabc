//! HTTP routes for levelup

pub mod health;
pub mod roster;
pub mod updates;

pub use health::health_check;
pub use roster::{
    handle_archive_student, handle_create_class, handle_create_student, handle_get_class,
    handle_get_student, handle_members,
};
pub use updates::{handle_batch_update, handle_student_update};

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderMap;
use hyper::{Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::engine::CallerIdentity;
use crate::types::EngineError;

/// Header carrying the verified teacher ID
pub const TEACHER_ID_HEADER: &str = "x-teacher-id";
/// Header carrying a class join code
pub const CLASS_CODE_HEADER: &str = "x-class-code";

/// Error body: `{"error": <kind>, "message": <text>}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_string(body) {
        Ok(json) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(json)))
            .unwrap_or_else(|_| plain_500("Failed to build response")),
        Err(_) => plain_500("Failed to serialize response"),
    }
}

fn plain_500(message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// HTTP status for an engine error
pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Unauthorized(_) => StatusCode::FORBIDDEN,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::InvalidMutation(_) => StatusCode::BAD_REQUEST,
        EngineError::Store(_) | EngineError::Config(_) | EngineError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_response(err: &EngineError) -> Response<Full<Bytes>> {
    json_response(
        status_for(err),
        &ErrorResponse {
            error: err.kind().to_string(),
            message: err.to_string(),
        },
    )
}

pub fn bad_request(message: impl Into<String>) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::BAD_REQUEST,
        &ErrorResponse {
            error: "BadRequest".to_string(),
            message: message.into(),
        },
    )
}

pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse {
            error: "NotFound".to_string(),
            message: format!("No route for {}", path),
        },
    )
}

/// Build the caller identity from the identity headers
pub fn caller_from_headers(headers: &HeaderMap) -> CallerIdentity {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    CallerIdentity {
        teacher_id: header(TEACHER_ID_HEADER),
        class_code: header(CLASS_CODE_HEADER),
    }
}

/// Decode a JSON request body, mapping failures to a 400 response
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response<Full<Bytes>>> {
    serde_json::from_slice(body).map_err(|e| bad_request(format!("Invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&EngineError::NotFound("s".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&EngineError::Unauthorized("s".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&EngineError::Conflict("s".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&EngineError::InvalidMutation("s".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&EngineError::Store("s".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_caller_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(TEACHER_ID_HEADER, HeaderValue::from_static("t-1"));
        headers.insert(CLASS_CODE_HEADER, HeaderValue::from_static("  "));

        let caller = caller_from_headers(&headers);
        assert_eq!(caller.teacher_id.as_deref(), Some("t-1"));
        assert_eq!(caller.class_code, None);
    }
}
