//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Request bodies are read
//! in full and handed to [`route`], which tests drive without a socket.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::routes;
use crate::runtime::EngineRuntime;
use crate::types::Result;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub runtime: Arc<EngineRuntime>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(runtime: Arc<EngineRuntime>) -> Self {
        Self {
            runtime,
            started_at: Instant::now(),
        }
    }
}

/// Accept connections on `listen` until the task is dropped
pub async fn run(state: Arc<AppState>, listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;

    info!(
        "levelup listening on {} (store backend: {})",
        listen,
        state.runtime.backend()
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    debug!("[{}] {} {}", addr, parts.method, path);

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(to_boxed(routes::bad_request(format!(
                "Failed to read request body: {}",
                e
            ))))
        }
    };

    let response = route(&state, &parts.method, &path, &parts.headers, &body).await;
    Ok(to_boxed(response))
}

/// Dispatch one request to its handler
pub async fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["health"]) => routes::health_check(state),

        // ====================================================================
        // Updates
        // ====================================================================
        (&Method::POST, ["students", id, "update"]) => {
            routes::handle_student_update(state, id, headers, body).await
        }
        (&Method::POST, ["batch-update"]) => routes::handle_batch_update(state, headers, body).await,

        // ====================================================================
        // Roster
        // ====================================================================
        (&Method::POST, ["classes"]) => routes::handle_create_class(state, headers, body).await,
        (&Method::GET, ["classes", id]) => routes::handle_get_class(state, id, headers).await,
        (&Method::GET, ["classes", id, "members"]) => {
            routes::handle_members(state, id, headers).await
        }
        (&Method::POST, ["classes", id, "students"]) => {
            routes::handle_create_student(state, id, headers, body).await
        }
        (&Method::GET, ["students", id]) => routes::handle_get_student(state, id, headers).await,
        (&Method::POST, ["students", id, "archive"]) => {
            routes::handle_archive_student(state, id, headers).await
        }

        _ => routes::not_found_response(path),
    }
}

fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::engine::{ClassOwnership, EngineConfig, SystemClock};
    use hyper::header::HeaderValue;
    use hyper::StatusCode;
    use serde_json::{json, Value};

    fn state() -> AppState {
        let runtime = EngineRuntime::with_store(
            Arc::new(MemoryStore::new()),
            Arc::new(ClassOwnership),
            Arc::new(SystemClock),
            EngineConfig {
                txn_rate_per_sec: 0.0,
                ..EngineConfig::default()
            },
        );
        AppState::new(Arc::new(runtime))
    }

    fn teacher(id: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(routes::TEACHER_ID_HEADER, HeaderValue::from_static(id));
        headers
    }

    async fn call(
        state: &AppState,
        method: Method,
        path: &str,
        headers: &HeaderMap,
        body: Value,
    ) -> (StatusCode, Value) {
        let body = if body.is_null() {
            Bytes::new()
        } else {
            Bytes::from(body.to_string())
        };
        let response = route(state, &method, path, headers, &body).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let state = state();
        let (status, body) = call(&state, Method::GET, "/health", &HeaderMap::new(), Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backend"], json!("memory"));
        assert_eq!(body["healthy"], json!(true));
    }

    #[tokio::test]
    async fn test_roster_and_updates_over_routes() {
        let state = state();
        let t1 = teacher("t-1");

        let (status, class) = call(&state, Method::POST, "/classes", &t1, json!({"name": "Period 5"})).await;
        assert_eq!(status, StatusCode::CREATED);
        let class_id = class["id"].as_str().unwrap().to_string();

        let (status, student) = call(
            &state,
            Method::POST,
            &format!("/classes/{}/students", class_id),
            &t1,
            json!({"name": "Grace"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let student_id = student["id"].as_str().unwrap().to_string();

        let (status, outcome) = call(
            &state,
            Method::POST,
            &format!("/students/{}/update", student_id),
            &t1,
            json!({"mode": "increment", "fields": {"totalPoints": 25}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["student"]["totalPoints"], json!(25));
        assert_eq!(outcome["appliedDeltas"]["totalPoints"]["delta"], json!(25));

        let (status, batch) = call(
            &state,
            Method::POST,
            "/batch-update",
            &t1,
            json!({
                "target": {"class": {"classId": class_id}},
                "mutation": {"mode": "increment", "fields": {"currency": 5}}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(batch["succeeded"].as_array().unwrap().len(), 1);

        let (status, members) = call(
            &state,
            Method::GET,
            &format!("/classes/{}/members", class_id),
            &t1,
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(members["count"], json!(1));

        let (status, archived) = call(
            &state,
            Method::POST,
            &format!("/students/{}/archive", student_id),
            &t1,
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(archived["archived"], json!(true));
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let state = state();
        let t1 = teacher("t-1");

        let (status, body) = call(
            &state,
            Method::POST,
            "/students/ghost/update",
            &t1,
            json!({"mode": "increment", "fields": {"totalPoints": 1}}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("NotFound"));

        let (_, class) = call(&state, Method::POST, "/classes", &t1, json!({"name": "P6"})).await;
        let path = format!("/classes/{}", class["id"].as_str().unwrap());
        let (status, body) = call(&state, Method::GET, &path, &teacher("t-2"), Value::Null).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], json!("Unauthorized"));

        let (status, body) = call(&state, Method::POST, "/batch-update", &t1, json!({"nope": 1})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("BadRequest"));

        let (status, _) = call(&state, Method::DELETE, "/classes", &t1, Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
