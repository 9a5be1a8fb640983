use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HyperBuilder;

use engine::Dispatcher;

use crate::router::{call_mode, collect_headers, function_name, outcome_parts};

/// Accept loop of the high-throughput HTTP front-end. Every connection gets
/// its own task and is served by hyper directly, without a router.
pub async fn serve_http_fast(listener: tokio::net::TcpListener, dispatcher: Arc<Dispatcher>) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("HTTP accept failed: {}", err);
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service =
                service_fn(move |req| handle_request_fast(Arc::clone(&dispatcher), req));
            let builder = HyperBuilder::new(TokioExecutor::new());
            if let Err(err) = builder.serve_connection(io, service).await {
                tracing::debug!("HTTP connection closed: {}", err);
            }
        });
    }
}

async fn handle_request_fast(
    dispatcher: Arc<Dispatcher>,
    request: hyper::Request<Incoming>,
) -> Result<hyper::Response<Full<Bytes>>, hyper::Error> {
    let name = function_name(request.uri().path()).to_string();
    let mode = call_mode(request.headers());
    let headers = collect_headers(request.headers());

    let payload = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!(function = %name, "reading request body failed: {}", err);
            return Ok(response(StatusCode::BAD_REQUEST, Bytes::new()));
        }
    };

    let outcome = dispatcher.call(&name, payload, &headers, mode).await;
    let (status, body) = outcome_parts(outcome);
    Ok(response(status, body))
}

fn response(status: StatusCode, body: Bytes) -> hyper::Response<Full<Bytes>> {
    let mut response = hyper::Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}
