use std::net::SocketAddr;
use std::sync::Arc;

use engine::Dispatcher;

use crate::fast::serve_http_fast;
use crate::listener::bind_reuseport;
use crate::router::app_router;

/// Baseline HTTP front-end: one listener, axum router.
pub async fn serve_http(dispatcher: Arc<Dispatcher>, addr: SocketAddr) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| format!("HTTP bind {} failed: {}", addr, err))?;
    tracing::info!("HTTP front-end listening on {}", addr);
    axum::serve(listener, app_router(dispatcher))
        .await
        .map_err(|err| format!("HTTP front-end exited: {}", err))
}

/// High-throughput HTTP front-end: `workers` reuseport listeners on the same
/// address, each running its own hyper accept loop.
pub async fn serve_http_reuseport(
    dispatcher: Arc<Dispatcher>,
    addr: SocketAddr,
    workers: usize,
) -> Result<(), String> {
    let workers = workers.max(1);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let listener = bind_reuseport(addr)?;
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(serve_http_fast(listener, dispatcher)));
    }
    tracing::info!("fast HTTP front-end listening on {} ({} workers)", addr, workers);

    for handle in handles {
        handle
            .await
            .map_err(|err| format!("fast HTTP worker failed: {}", err))?;
    }
    Ok(())
}
