//! HTTP API for the coordinator
//!
//! - `GET /health/check`: liveness, always 200
//! - `GET /readiness/check`: one write and one read through quorum
//! - `PUT /api`: write a record, body `{"name": string, "age": integer}`
//! - `GET /api`: read a record, body `{"name": string}`
//! - `GET /metrics`: Prometheus text
//!
//! Request bodies are validated here; invalid requests never reach the
//! coordinators.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result};
use crate::coordinator::QuorumEngine;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared coordinator state for HTTP handlers.
#[derive(Clone)]
pub struct CoordState {
    pub engine: QuorumEngine,
}

/// Creates the HTTP router with all public endpoints.
pub fn create_router(state: CoordState) -> Router {
    let metrics = state.engine.metrics.clone();
    Router::new()
        .route("/health/check", get(health_check))
        .route("/readiness/check", get(readiness_check))
        .route("/api", get(get_record).put(put_record))
        .route("/metrics", get(metrics_text))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            metrics,
            request_tracing_middleware,
        ))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "Feeling healthy": true })))
}

async fn readiness_check(State(state): State<CoordState>) -> impl IntoResponse {
    if state.engine.ready().await {
        (StatusCode::OK, Json(json!({ "ready": true })))
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({ "ready": false })))
    }
}

async fn metrics_text(State(state): State<CoordState>) -> impl IntoResponse {
    (StatusCode::OK, state.engine.metrics.to_prometheus())
}

fn error_response(e: &Error) -> Response {
    (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response()
}

/// Parse the body as a JSON object.
pub fn parse_body(body: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Validation(
            "request body must be a JSON object".into(),
        )),
        Err(e) => Err(Error::Validation(format!("invalid JSON body: {}", e))),
    }
}

/// `name` must be present and a string.
pub fn verify_name(data: &Map<String, Value>) -> Result<String> {
    match data.get("name") {
        None | Some(Value::Null) => Err(Error::Validation(
            "name not present, name must be a non-null string".into(),
        )),
        Some(Value::String(name)) => Ok(name.clone()),
        Some(_) => Err(Error::Validation(
            "name is not a string, name must be a non-null string".into(),
        )),
    }
}

/// `age` must be present and coercible to a 32-bit integer.
///
/// Accepts JSON integers, floats (truncated toward zero) and strings
/// holding an integer.
pub fn verify_age(data: &Map<String, Value>) -> Result<i32> {
    let not_integer = || Error::Validation("age is not an integer, age must be an integer".into());

    let wide: i64 = match data.get("age") {
        None | Some(Value::Null) => {
            return Err(Error::Validation(
                "age not present, age must be a non-null integer".into(),
            ))
        }
        Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i,
            (None, Some(f)) if f.is_finite() && f.trunc().abs() <= i64::MAX as f64 => {
                f.trunc() as i64
            }
            _ => return Err(not_integer()),
        },
        Some(Value::String(s)) => s.trim().parse().map_err(|_| not_integer())?,
        Some(_) => return Err(not_integer()),
    };

    i32::try_from(wide).map_err(|_| not_integer())
}

async fn put_record(State(state): State<CoordState>, body: Bytes) -> Response {
    let (name, age) = match parse_body(&body).and_then(|data| {
        let name = verify_name(&data)?;
        let age = verify_age(&data)?;
        Ok((name, age))
    }) {
        Ok(fields) => fields,
        Err(e) => return error_response(&e),
    };

    if let Some(resp) = ensure_table(&state).await {
        return resp;
    }

    match state.engine.write_record(&name, age).await {
        Ok(outcome) if outcome.committed => {
            (StatusCode::OK, Json(json!({ "write": "successful" }))).into_response()
        }
        Ok(outcome) => {
            tracing::warn!(
                name = %name,
                acknowledged = outcome.acknowledged,
                required = outcome.required,
                "Write did not reach quorum"
            );
            write_failed(&name, age)
        }
        Err(e) => {
            tracing::error!(name = %name, error = %e, "Write aborted");
            write_failed(&name, age)
        }
    }
}

fn write_failed(name: &str, age: i32) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Write failed", "name": name, "age": age })),
    )
        .into_response()
}

async fn get_record(State(state): State<CoordState>, body: Bytes) -> Response {
    let name = match parse_body(&body).and_then(|data| verify_name(&data)) {
        Ok(name) => name,
        Err(e) => return error_response(&e),
    };

    if let Some(resp) = ensure_table(&state).await {
        return resp;
    }

    match state.engine.read_age(&name).await {
        Ok(Some(age)) => (StatusCode::OK, Json(json!({ "name": name, "age": age }))).into_response(),
        Ok(None) => read_failed(&name),
        Err(e) => {
            tracing::error!(name = %name, error = %e, "Read aborted");
            read_failed(&name)
        }
    }
}

fn read_failed(name: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Read failed", "name": name })),
    )
        .into_response()
}

/// `None` when the table is in place, otherwise the response to send.
async fn ensure_table(state: &CoordState) -> Option<Response> {
    let ok = match state.engine.ensure_table().await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::error!(error = %e, "Table creation aborted");
            false
        }
    };
    if ok {
        None
    } else {
        Some(
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "create-table": "FAILED" })),
            )
                .into_response(),
        )
    }
}
