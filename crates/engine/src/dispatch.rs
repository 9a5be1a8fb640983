use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use registry::{FunctionRegistry, function_url};

use crate::headers::forwarded_headers;

/// Transport-independent outcome of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    Ok,
    Accepted,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Wait for the unit's response, bounded by the call timeout.
    Sync,
    /// Fire-and-forget: answer `Accepted` as soon as an endpoint is chosen.
    Async,
}

impl CallMode {
    pub fn from_async_flag(is_async: bool) -> Self {
        if is_async { Self::Async } else { Self::Sync }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub status: CallStatus,
    pub body: Bytes,
}

impl CallOutcome {
    fn empty(status: CallStatus) -> Self {
        Self {
            status,
            body: Bytes::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Port every execution unit listens on for invocations.
    pub function_port: u16,
    /// Upper bound for one backend call (sync and async alike).
    pub call_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            function_port: 8000,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Resolves functions through the registry and forwards payloads to one of
/// their execution units. Shared by every protocol front-end.
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    client: reqwest::Client,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<FunctionRegistry>, config: DispatchConfig) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(1024)
            .tcp_nodelay(true)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!("falling back to default HTTP client: {}", err);
                reqwest::Client::new()
            });
        Self {
            registry,
            client,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Invoke `name` with `payload`.
    ///
    /// A single attempt is made: any transport failure, timeout or non-2xx
    /// answer from the unit is reported as [`CallStatus::Error`]. In
    /// [`CallMode::Async`] the outcome of the backend call is never
    /// observed, see [`spawn_detached`].
    pub async fn call(
        &self,
        name: &str,
        payload: Bytes,
        headers: &[(String, String)],
        mode: CallMode,
    ) -> CallOutcome {
        let endpoints = match self.registry.lookup(name) {
            Ok(endpoints) => endpoints,
            Err(_) => {
                tracing::debug!(function = name, "function not found");
                return CallOutcome::empty(CallStatus::NotFound);
            }
        };

        let url = function_url(choose_endpoint(&endpoints), self.config.function_port);
        let request = match self
            .client
            .post(&url)
            .headers(forwarded_headers(headers))
            .body(payload)
            .timeout(self.config.call_timeout)
            .build()
        {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(function = name, endpoint = %url, "invalid outbound request: {}", err);
                return CallOutcome::empty(CallStatus::Error);
            }
        };

        match mode {
            CallMode::Async => {
                spawn_detached(self.client.clone(), request, name.to_string());
                tracing::debug!(function = name, endpoint = %url, "async request accepted");
                CallOutcome::empty(CallStatus::Accepted)
            }
            CallMode::Sync => self.call_sync(name, &url, request).await,
        }
    }

    async fn call_sync(&self, name: &str, url: &str, request: reqwest::Request) -> CallOutcome {
        let started = Instant::now();
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(function = name, endpoint = url, "backend call failed: {}", err);
                return CallOutcome::empty(CallStatus::Error);
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                function = name,
                endpoint = url,
                "backend returned status {}",
                status.as_u16()
            );
            return CallOutcome::empty(CallStatus::Error);
        }

        match response.bytes().await {
            Ok(body) => {
                tracing::debug!(
                    function = name,
                    endpoint = url,
                    "sync request finished in {}µs",
                    started.elapsed().as_micros()
                );
                CallOutcome {
                    status: CallStatus::Ok,
                    body,
                }
            }
            Err(err) => {
                tracing::warn!(function = name, endpoint = url, "reading backend response failed: {}", err);
                CallOutcome::empty(CallStatus::Error)
            }
        }
    }
}

/// Issue `request` on an unsupervised task.
///
/// The join handle is dropped: nobody waits for the call, it
/// cannot be cancelled, and its result (success or failure) is discarded
/// after logging. The original caller has already been told `Accepted` and
/// never learns whether the unit processed the payload.
pub fn spawn_detached(client: reqwest::Client, request: reqwest::Request, function: String) {
    tokio::spawn(async move {
        match client.execute(request).await {
            Ok(response) => {
                let status = response.status();
                // drain so the connection returns to the pool
                let _ = response.bytes().await;
                tracing::debug!(function = %function, "async request finished with {}", status.as_u16());
            }
            Err(err) => {
                tracing::debug!(function = %function, "async request dropped: {}", err);
            }
        }
    });
}

/// Uniformly random pick; units of one function are interchangeable.
fn choose_endpoint(endpoints: &[String]) -> &str {
    let index = rand::thread_rng().gen_range(0..endpoints.len());
    &endpoints[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    async fn spawn_unit(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    fn echo_unit() -> Router {
        Router::new().route("/fn", post(|body: Bytes| async move { body }))
    }

    fn dispatcher_with(endpoints: Vec<String>, config: DispatchConfig) -> Dispatcher {
        let registry = Arc::new(FunctionRegistry::new());
        registry.upsert("echo", endpoints).unwrap();
        Dispatcher::new(registry, config)
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let dispatcher = Dispatcher::new(Arc::new(FunctionRegistry::new()), DispatchConfig::default());
        let outcome = dispatcher
            .call("missing", Bytes::from_static(b"x"), &[], CallMode::Sync)
            .await;
        assert_eq!(outcome.status, CallStatus::NotFound);
        assert!(outcome.body.is_empty());
    }

    #[tokio::test]
    async fn sync_call_returns_unit_body() {
        let unit = spawn_unit(echo_unit()).await;
        let dispatcher = dispatcher_with(vec![unit], DispatchConfig::default());
        let outcome = dispatcher
            .call("echo", Bytes::from_static(b"hello"), &[], CallMode::Sync)
            .await;
        assert_eq!(outcome.status, CallStatus::Ok);
        assert_eq!(outcome.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn non_success_status_is_error() {
        let unit = spawn_unit(Router::new().route(
            "/fn",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;
        let dispatcher = dispatcher_with(vec![unit], DispatchConfig::default());
        let outcome = dispatcher.call("echo", Bytes::new(), &[], CallMode::Sync).await;
        assert_eq!(outcome.status, CallStatus::Error);
        assert!(outcome.body.is_empty());
    }

    #[tokio::test]
    async fn unreachable_unit_is_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let dispatcher = dispatcher_with(vec![addr], DispatchConfig::default());
        let outcome = dispatcher.call("echo", Bytes::new(), &[], CallMode::Sync).await;
        assert_eq!(outcome.status, CallStatus::Error);
    }

    #[tokio::test]
    async fn sync_call_is_bounded_by_timeout() {
        let unit = spawn_unit(Router::new().route(
            "/fn",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let config = DispatchConfig {
            call_timeout: Duration::from_millis(200),
            ..DispatchConfig::default()
        };
        let dispatcher = dispatcher_with(vec![unit], config);
        let started = Instant::now();
        let outcome = dispatcher.call("echo", Bytes::new(), &[], CallMode::Sync).await;
        assert_eq!(outcome.status, CallStatus::Error);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn async_call_does_not_wait_for_unit() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let unit = spawn_unit(Router::new().route(
            "/fn",
            post(move |body: Bytes| {
                let tx = tx.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    let _ = tx.send(body);
                    "done"
                }
            }),
        ))
        .await;
        let dispatcher = dispatcher_with(vec![unit], DispatchConfig::default());

        let started = Instant::now();
        let outcome = dispatcher
            .call("echo", Bytes::from_static(b"later"), &[], CallMode::Async)
            .await;
        assert_eq!(outcome.status, CallStatus::Accepted);
        assert!(outcome.body.is_empty());
        assert!(started.elapsed() < Duration::from_millis(1000));

        // the detached call still reaches the unit
        let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("unit should receive the async payload")
            .unwrap();
        assert_eq!(delivered, Bytes::from_static(b"later"));
    }

    #[tokio::test]
    async fn async_call_to_dead_unit_is_still_accepted() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let dispatcher = dispatcher_with(vec![addr], DispatchConfig::default());
        let outcome = dispatcher.call("echo", Bytes::new(), &[], CallMode::Async).await;
        assert_eq!(outcome.status, CallStatus::Accepted);
    }

    #[tokio::test]
    async fn spreads_calls_over_all_endpoints() {
        let a = spawn_unit(Router::new().route("/fn", post(|| async { "a" }))).await;
        let b = spawn_unit(Router::new().route("/fn", post(|| async { "b" }))).await;
        let dispatcher = dispatcher_with(vec![a, b], DispatchConfig::default());

        let mut seen = HashSet::new();
        for _ in 0..100 {
            let outcome = dispatcher.call("echo", Bytes::new(), &[], CallMode::Sync).await;
            assert_eq!(outcome.status, CallStatus::Ok);
            seen.insert(outcome.body);
        }
        assert!(seen.contains(&Bytes::from_static(b"a")));
        assert!(seen.contains(&Bytes::from_static(b"b")));
    }

    #[tokio::test]
    async fn forwards_sanitized_headers() {
        let unit = spawn_unit(Router::new().route(
            "/fn",
            post(|headers: HeaderMap| async move {
                headers
                    .get("x-callerid")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("missing")
                    .to_string()
            }),
        ))
        .await;
        let dispatcher = dispatcher_with(vec![unit], DispatchConfig::default());
        let headers = vec![("X-(Caller) Id:".to_string(), "42".to_string())];
        let outcome = dispatcher
            .call("echo", Bytes::new(), &headers, CallMode::Sync)
            .await;
        assert_eq!(outcome.status, CallStatus::Ok);
        assert_eq!(outcome.body, Bytes::from_static(b"42"));
    }
}
