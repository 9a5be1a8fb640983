use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
};
use registry::FunctionRegistry;
use tower_http::trace::TraceLayer;

use crate::{ControlError, ControlMessage, apply};

pub fn control_router(registry: Arc<FunctionRegistry>) -> Router {
    Router::new()
        .route("/", post(handle_message))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn handle_message(
    State(registry): State<Arc<FunctionRegistry>>,
    body: Bytes,
) -> (StatusCode, String) {
    let result = serde_json::from_slice::<ControlMessage>(&body)
        .map_err(|err| ControlError::Malformed(err.to_string()))
        .and_then(|message| apply(&registry, &message));

    match result {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(err) => {
            tracing::warn!("control message rejected: {}", err);
            let status =
                StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, err.to_string())
        }
    }
}

pub async fn serve_control(registry: Arc<FunctionRegistry>, addr: SocketAddr) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| format!("control bind {} failed: {}", addr, err))?;
    tracing::info!("control plane listening on {}", addr);
    axum::serve(listener, control_router(registry))
        .await
        .map_err(|err| format!("control plane exited: {}", err))
}
