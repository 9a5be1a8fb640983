use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use engine::{CallMode, CallOutcome, CallStatus, Dispatcher};

/// Request header selecting fire-and-forget dispatch when non-empty.
pub const ASYNC_HEADER: &str = "x-nimbus-async";

pub fn app_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().fallback(handle_request).with_state(dispatcher)
}

async fn handle_request(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request,
) -> Response {
    let name = function_name(request.uri().path()).to_string();
    let mode = call_mode(request.headers());
    let headers = collect_headers(request.headers());

    let payload = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(function = %name, "reading request body failed: {}", err);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let outcome = dispatcher.call(&name, payload, &headers, mode).await;
    let (status, body) = outcome_parts(outcome);
    (status, body).into_response()
}

/// Function name addressed by a URL path: the path minus its leading slashes.
pub fn function_name(path: &str) -> &str {
    path.trim_start_matches('/')
}

pub(crate) fn call_mode(headers: &HeaderMap) -> CallMode {
    let is_async = headers
        .get(ASYNC_HEADER)
        .is_some_and(|value| !value.is_empty());
    CallMode::from_async_flag(is_async)
}

/// Caller headers as owned pairs; values that are not visible ASCII are skipped.
pub(crate) fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(headers.len());
    for (key, value) in headers.iter() {
        if key.as_str() == ASYNC_HEADER {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.push((key.as_str().to_string(), value.to_string()));
        }
    }
    out
}

pub(crate) fn outcome_parts(outcome: CallOutcome) -> (StatusCode, Bytes) {
    match outcome.status {
        CallStatus::Ok => (StatusCode::OK, outcome.body),
        CallStatus::Accepted => (StatusCode::ACCEPTED, Bytes::new()),
        CallStatus::NotFound => (StatusCode::NOT_FOUND, Bytes::new()),
        CallStatus::Error => (StatusCode::INTERNAL_SERVER_ERROR, Bytes::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_every_leading_slash() {
        assert_eq!(function_name("/echo"), "echo");
        assert_eq!(function_name("///echo"), "echo");
        assert_eq!(function_name("echo"), "echo");
        assert_eq!(function_name("/"), "");
    }

    #[test]
    fn async_marker_needs_a_value() {
        let mut headers = HeaderMap::new();
        assert_eq!(call_mode(&headers), CallMode::Sync);
        headers.insert(ASYNC_HEADER, HeaderValue::from_static(""));
        assert_eq!(call_mode(&headers), CallMode::Sync);
        headers.insert("X-Nimbus-Async", HeaderValue::from_static("true"));
        assert_eq!(call_mode(&headers), CallMode::Async);
    }

    #[test]
    fn marker_is_not_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(ASYNC_HEADER, HeaderValue::from_static("1"));
        headers.insert("x-trace", HeaderValue::from_static("abc"));
        assert_eq!(
            collect_headers(&headers),
            vec![("x-trace".to_string(), "abc".to_string())]
        );
    }

    #[test]
    fn maps_every_status() {
        let outcome = |status| CallOutcome {
            status,
            body: Bytes::from_static(b"body"),
        };
        assert_eq!(
            outcome_parts(outcome(CallStatus::Ok)),
            (StatusCode::OK, Bytes::from_static(b"body"))
        );
        assert_eq!(outcome_parts(outcome(CallStatus::Accepted)).0, StatusCode::ACCEPTED);
        assert_eq!(outcome_parts(outcome(CallStatus::NotFound)).0, StatusCode::NOT_FOUND);
        assert_eq!(
            outcome_parts(outcome(CallStatus::Error)).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
