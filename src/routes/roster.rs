//! Roster endpoints
//!
//! - `POST /classes` - create a class owned by the calling teacher
//! - `GET /classes/{id}` - class record
//! - `GET /classes/{id}/members` - roster
//! - `POST /classes/{id}/students` - create a student in the class
//! - `GET /students/{id}` - student snapshot
//! - `POST /students/{id}/archive` - archive a student

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderMap;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{caller_from_headers, error_response, json_response, parse_body};
use crate::server::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClassRequest {
    pub name: String,
    #[serde(default)]
    pub class_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateStudentRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersResponse {
    pub class_id: String,
    pub student_ids: Vec<String>,
    pub count: usize,
}

pub async fn handle_create_class(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let request: CreateClassRequest = match parse_body(body) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let caller = caller_from_headers(headers);

    match state
        .runtime
        .roster
        .create_class(&caller, &request.name, request.class_code)
        .await
    {
        Ok(class) => json_response(StatusCode::CREATED, &class),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_get_class(
    state: &AppState,
    class_id: &str,
    headers: &HeaderMap,
) -> Response<Full<Bytes>> {
    let caller = caller_from_headers(headers);
    match state.runtime.roster.get_class(class_id, &caller).await {
        Ok(class) => json_response(StatusCode::OK, &class),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_members(
    state: &AppState,
    class_id: &str,
    headers: &HeaderMap,
) -> Response<Full<Bytes>> {
    let caller = caller_from_headers(headers);
    match state.runtime.roster.members(class_id, &caller).await {
        Ok(members) => json_response(
            StatusCode::OK,
            &MembersResponse {
                class_id: class_id.to_string(),
                count: members.len(),
                student_ids: members.into_iter().collect(),
            },
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_create_student(
    state: &AppState,
    class_id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    // An empty body creates an unnamed student
    let request: CreateStudentRequest = if body.is_empty() {
        CreateStudentRequest::default()
    } else {
        match parse_body(body) {
            Ok(r) => r,
            Err(response) => return response,
        }
    };
    let caller = caller_from_headers(headers);

    match state
        .runtime
        .roster
        .create_student(class_id, request.name, &caller)
        .await
    {
        Ok(student) => json_response(StatusCode::CREATED, &student),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_get_student(
    state: &AppState,
    student_id: &str,
    headers: &HeaderMap,
) -> Response<Full<Bytes>> {
    let caller = caller_from_headers(headers);
    match state.runtime.roster.get_student(student_id, &caller).await {
        Ok(student) => json_response(StatusCode::OK, &student),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_archive_student(
    state: &AppState,
    student_id: &str,
    headers: &HeaderMap,
) -> Response<Full<Bytes>> {
    let caller = caller_from_headers(headers);
    match state.runtime.roster.archive_student(student_id, &caller).await {
        Ok(student) => json_response(StatusCode::OK, &student),
        Err(e) => error_response(&e),
    }
}
