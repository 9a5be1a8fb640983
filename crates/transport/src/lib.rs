pub mod coap;
pub mod fastcoap;
pub mod grpc;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use tokio::task::JoinSet;

pub use engine::Dispatcher;

/// Wire protocols a front-end can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Coap,
    FastCoap,
    FastHttp,
    Grpc,
    Http,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::Coap,
        Protocol::FastCoap,
        Protocol::FastHttp,
        Protocol::Grpc,
        Protocol::Http,
    ];

    /// Config and environment name (`fasthttp` → `FASTHTTP_PORT`).
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Coap => "coap",
            Protocol::FastCoap => "fastcoap",
            Protocol::FastHttp => "fasthttp",
            Protocol::Grpc => "grpc",
            Protocol::Http => "http",
        }
    }

    /// URL scheme clients use to reach this front-end.
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Coap | Protocol::FastCoap => "coap",
            Protocol::FastHttp | Protocol::Http => "http",
            Protocol::Grpc => "grpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|protocol| protocol.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown protocol {:?}", value))
    }
}

pub struct HttpOptions {
    pub addr: SocketAddr,
}

pub struct CoapOptions {
    pub addr: SocketAddr,
}

pub struct GrpcOptions {
    pub addr: SocketAddr,
}

/// Options of the reuseport front-ends: one socket and loop per worker.
pub struct FastOptions {
    pub addr: SocketAddr,
    pub workers: usize,
}

pub enum ListenConfig {
    Http(HttpOptions),
    FastHttp(FastOptions),
    Coap(CoapOptions),
    FastCoap(FastOptions),
    Grpc(GrpcOptions),
}

impl ListenConfig {
    pub fn new(protocol: Protocol, addr: SocketAddr, workers: usize) -> Self {
        match protocol {
            Protocol::Http => ListenConfig::Http(HttpOptions { addr }),
            Protocol::FastHttp => ListenConfig::FastHttp(FastOptions { addr, workers }),
            Protocol::Coap => ListenConfig::Coap(CoapOptions { addr }),
            Protocol::FastCoap => ListenConfig::FastCoap(FastOptions { addr, workers }),
            Protocol::Grpc => ListenConfig::Grpc(GrpcOptions { addr }),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            ListenConfig::Http(_) => Protocol::Http,
            ListenConfig::FastHttp(_) => Protocol::FastHttp,
            ListenConfig::Coap(_) => Protocol::Coap,
            ListenConfig::FastCoap(_) => Protocol::FastCoap,
            ListenConfig::Grpc(_) => Protocol::Grpc,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        match self {
            ListenConfig::Http(options) => options.addr,
            ListenConfig::Coap(options) => options.addr,
            ListenConfig::Grpc(options) => options.addr,
            ListenConfig::FastHttp(options) | ListenConfig::FastCoap(options) => options.addr,
        }
    }
}

pub async fn serve(dispatcher: Arc<Dispatcher>, target: ListenConfig) -> Result<(), String> {
    match target {
        ListenConfig::Http(options) => http_front::serve_http(dispatcher, options.addr).await,
        ListenConfig::FastHttp(options) => {
            http_front::serve_http_reuseport(dispatcher, options.addr, options.workers).await
        }
        ListenConfig::Coap(options) => coap::serve_coap(dispatcher, options).await,
        ListenConfig::FastCoap(options) => fastcoap::serve_coap_fast(dispatcher, options).await,
        ListenConfig::Grpc(options) => grpc::serve_grpc(dispatcher, options).await,
    }
}

/// Run every front-end concurrently on one shared dispatcher.
///
/// Front-ends run until the process exits; the first one that fails takes
/// the others down with it.
pub async fn serve_all(
    dispatcher: Arc<Dispatcher>,
    targets: Vec<ListenConfig>,
) -> Result<(), String> {
    if targets.is_empty() {
        return Err("no front-end enabled".to_string());
    }

    let mut tasks = JoinSet::new();
    for target in targets {
        let protocol = target.protocol();
        let dispatcher = Arc::clone(&dispatcher);
        tasks.spawn(async move { (protocol, serve(dispatcher, target).await) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((protocol, Ok(()))) => tracing::info!("{} front-end stopped", protocol),
            Ok((protocol, Err(err))) => {
                tracing::error!("{} front-end failed: {}", protocol, err);
                return Err(format!("{}: {}", protocol, err));
            }
            Err(err) => return Err(format!("front-end task failed: {}", err)),
        }
    }
    Ok(())
}
