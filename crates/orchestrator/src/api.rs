use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::error::OrchestratorError;
use crate::orchestrator::{DeployRequest, Orchestrator};
use crate::package::PackageSource;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// `<scheme>://<host>:<port>` of every enabled front-end, sorted.
    pub front_ends: Arc<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct UploadBody {
    name: String,
    env: String,
    threads: usize,
    zip: String,
    #[serde(default)]
    envs: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct UploadUrlBody {
    name: String,
    env: String,
    threads: usize,
    url: String,
    #[serde(default)]
    subfolder_path: Option<String>,
    #[serde(default)]
    envs: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DeleteBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    name: Option<String>,
}

pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/uploadURL", post(upload_url))
        .route("/delete", post(delete))
        .route("/wipe", post(wipe))
        .route("/list", get(list))
        .route("/logs", get(logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve_api(state: ApiState, addr: SocketAddr) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| format!("management API bind {} failed: {}", addr, err))?;
    tracing::info!("management API listening on {}", addr);
    axum::serve(listener, api_router(state))
        .await
        .map_err(|err| format!("management API exited: {}", err))
}

async fn upload(State(state): State<ApiState>, Json(body): Json<UploadBody>) -> Response {
    let request = DeployRequest {
        name: body.name,
        env: body.env,
        threads: body.threads,
        source: PackageSource::Inline(body.zip),
        subpath: None,
        env_vars: body.envs,
    };
    deploy(state, request).await
}

async fn upload_url(State(state): State<ApiState>, Json(body): Json<UploadUrlBody>) -> Response {
    let request = DeployRequest {
        name: body.name,
        env: body.env,
        threads: body.threads,
        source: PackageSource::Url(body.url),
        subpath: body.subfolder_path,
        env_vars: body.envs,
    };
    deploy(state, request).await
}

async fn deploy(state: ApiState, request: DeployRequest) -> Response {
    let name = request.name.clone();
    match state.orchestrator.deploy(request).await {
        Ok(_) => (StatusCode::OK, function_urls(&state.front_ends, &name)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete(State(state): State<ApiState>, Json(body): Json<DeleteBody>) -> Response {
    match state.orchestrator.delete(&body.name).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(err) => error_response(err),
    }
}

async fn wipe(State(state): State<ApiState>) -> Response {
    match state.orchestrator.wipe_all().await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(err) => error_response(err),
    }
}

async fn list(State(state): State<ApiState>) -> String {
    let mut out = String::new();
    for name in state.orchestrator.list().await {
        out.push_str(&name);
        out.push('\n');
    }
    out
}

async fn logs(State(state): State<ApiState>, Query(query): Query<LogsQuery>) -> Response {
    let result = match query.name.as_deref() {
        Some(name) if !name.is_empty() => state.orchestrator.logs(name).await,
        _ => state.orchestrator.logs_all().await,
    };
    match result {
        Ok(logs) => (StatusCode::OK, logs).into_response(),
        Err(err) => error_response(err),
    }
}

/// One line per front-end: `<scheme>://<host>:<port>/<name>`.
pub fn function_urls(front_ends: &[String], name: &str) -> String {
    let mut out = String::new();
    for base in front_ends {
        out.push_str(&format!("{}/{}\n", base, name));
    }
    out
}

fn error_response(err: OrchestratorError) -> Response {
    let status = match &err {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        _ if err.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("{}", err);
    }
    let mut body = err.to_string();
    if let OrchestratorError::HealthCheckTimeout { logs, .. } = &err {
        body.push('\n');
        body.push_str(logs);
    }
    (status, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_url_per_front_end() {
        let front_ends = vec![
            "coap://localhost:5683".to_string(),
            "grpc://localhost:9000".to_string(),
            "http://localhost:8000".to_string(),
        ];
        assert_eq!(
            function_urls(&front_ends, "echo"),
            "coap://localhost:5683/echo\ngrpc://localhost:9000/echo\nhttp://localhost:8000/echo\n"
        );
    }

    #[test]
    fn maps_errors_to_statuses() {
        let status = |err| error_response(err).status();
        assert_eq!(status(OrchestratorError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(OrchestratorError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(OrchestratorError::Wipe(Vec::new())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
