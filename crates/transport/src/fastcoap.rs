use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use engine::Dispatcher;

use crate::FastOptions;
use crate::coap::serve_socket;

/// High-throughput CoAP front-end: one reuseport UDP socket per worker, each
/// with its own receive loop. Same message handling as the baseline variant.
pub async fn serve_coap_fast(
    dispatcher: Arc<Dispatcher>,
    options: FastOptions,
) -> Result<(), String> {
    let workers = options.workers.max(1);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let socket = bind_udp_reuseport(options.addr)?;
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(serve_socket(Arc::new(socket), dispatcher)));
    }
    tracing::info!(
        "fast CoAP front-end listening on {} ({} workers)",
        options.addr,
        workers
    );

    for handle in handles {
        handle
            .await
            .map_err(|err| format!("fast CoAP worker failed: {}", err))??;
    }
    Ok(())
}

pub fn bind_udp_reuseport(addr: SocketAddr) -> Result<UdpSocket, String> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|err| format!("socket create failed: {}", err))?;
    socket
        .set_reuse_address(true)
        .map_err(|err| format!("set_reuse_address failed: {}", err))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .map_err(|err| format!("set_reuse_port failed: {}", err))?;
    socket
        .set_nonblocking(true)
        .map_err(|err| format!("set_nonblocking failed: {}", err))?;
    socket
        .bind(&addr.into())
        .map_err(|err| format!("bind {} failed: {}", addr, err))?;
    UdpSocket::from_std(socket.into()).map_err(|err| format!("tokio socket failed: {}", err))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
    use engine::DispatchConfig;
    use registry::FunctionRegistry;

    #[tokio::test]
    async fn workers_share_one_port() {
        let first = bind_udp_reuseport("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind_udp_reuseport(addr).unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn answers_not_found_like_the_baseline() {
        let registry = Arc::new(FunctionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry, DispatchConfig::default()));

        let socket = bind_udp_reuseport("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(serve_socket(Arc::new(socket), dispatcher));

        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(RequestType::Get);
        packet.header.message_id = 9;
        packet.add_option(CoapOption::UriPath, b"ghost".to_vec());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&packet.to_bytes().unwrap(), addr).await.unwrap();
        let mut buf = vec![0u8; 1500];
        let receive = client.recv_from(&mut buf);
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), receive)
            .await
            .unwrap()
            .unwrap();
        let reply = Packet::from_bytes(&buf[..len]).unwrap();
        assert_eq!(reply.header.code, MessageClass::Response(ResponseType::NotFound));
        assert_eq!(reply.header.message_id, 9);
    }
}
