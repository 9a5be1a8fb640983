use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use coap_lite::{
    CoapOption, CoapRequest, CoapResponse, ContentFormat, MessageClass, Packet, ResponseType,
};
use tokio::net::UdpSocket;

use engine::{CallMode, CallOutcome, CallStatus, Dispatcher};

use crate::CoapOptions;

/// Elective option (experimental range) selecting fire-and-forget dispatch.
pub const ASYNC_OPTION: u16 = 65000;

const MAX_DATAGRAM: usize = 64 * 1024;

pub async fn serve_coap(dispatcher: Arc<Dispatcher>, options: CoapOptions) -> Result<(), String> {
    let socket = UdpSocket::bind(options.addr)
        .await
        .map_err(|err| format!("CoAP bind {} failed: {}", options.addr, err))?;
    tracing::info!("CoAP front-end listening on {}", options.addr);
    serve_socket(Arc::new(socket), dispatcher).await
}

/// Receive loop for one UDP socket. Each datagram is handled on its own task
/// so a slow function never holds up the socket.
pub(crate) async fn serve_socket(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), String> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("CoAP receive failed: {}", err);
                continue;
            }
        };
        let datagram = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let Some(reply) = handle_datagram(&dispatcher, &datagram, peer).await else {
                return;
            };
            if let Err(err) = socket.send_to(&reply, peer).await {
                tracing::warn!(peer = %peer, "CoAP reply failed: {}", err);
            }
        });
    }
}

/// Decode one datagram, dispatch it and encode the reply.
///
/// Returns `None` for datagrams that are not CoAP requests or whose message
/// type admits no response.
pub async fn handle_datagram(
    dispatcher: &Dispatcher,
    datagram: &[u8],
    peer: SocketAddr,
) -> Option<Vec<u8>> {
    let packet = match Packet::from_bytes(datagram) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::debug!(peer = %peer, "dropping malformed CoAP datagram: {}", err);
            return None;
        }
    };
    if !matches!(packet.header.code, MessageClass::Request(_)) {
        return None;
    }
    let is_async = packet
        .get_option(CoapOption::Unknown(ASYNC_OPTION))
        .is_some();

    let mut request = CoapRequest::from_packet(packet, peer);
    let path = request.get_path();
    let name = path.trim_start_matches('/');
    let payload = Bytes::from(std::mem::take(&mut request.message.payload));

    let outcome = dispatcher
        .call(name, payload, &[], CallMode::from_async_flag(is_async))
        .await;

    let response = request.response.as_mut()?;
    apply_outcome(response, outcome);
    match response.message.to_bytes() {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            tracing::warn!(function = name, "encoding CoAP response failed: {}", err);
            None
        }
    }
}

fn apply_outcome(response: &mut CoapResponse, outcome: CallOutcome) {
    match outcome.status {
        CallStatus::Ok => {
            response.set_status(ResponseType::Content);
            response.message.set_content_format(ContentFormat::TextPlain);
            response.message.payload = outcome.body.to_vec();
        }
        CallStatus::Accepted => response.set_status(ResponseType::Created),
        CallStatus::NotFound => response.set_status(ResponseType::NotFound),
        CallStatus::Error => response.set_status(ResponseType::InternalServerError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::post;
    use coap_lite::{MessageType, RequestType};
    use engine::DispatchConfig;
    use registry::FunctionRegistry;

    async fn echo_dispatcher() -> Dispatcher {
        let unit = Router::new().route("/fn", post(|body: Bytes| async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, unit).await.unwrap();
        });
        let registry = Arc::new(FunctionRegistry::new());
        registry.upsert("echo", vec![addr.to_string()]).unwrap();
        Dispatcher::new(registry, DispatchConfig::default())
    }

    fn request(kind: MessageType, path: &str, payload: &[u8], is_async: bool) -> Vec<u8> {
        let mut packet = Packet::new();
        packet.header.set_type(kind);
        packet.header.code = MessageClass::Request(RequestType::Post);
        packet.header.message_id = 42;
        packet.set_token(vec![0xbe, 0xef]);
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        if is_async {
            packet.add_option(CoapOption::Unknown(ASYNC_OPTION), Vec::new());
        }
        packet.payload = payload.to_vec();
        packet.to_bytes().unwrap()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:5683".parse().unwrap()
    }

    #[tokio::test]
    async fn confirmable_request_gets_piggybacked_content() {
        let dispatcher = echo_dispatcher().await;
        let datagram = request(MessageType::Confirmable, "echo", b"ping", false);
        let reply = handle_datagram(&dispatcher, &datagram, peer()).await.unwrap();
        let reply = Packet::from_bytes(&reply).unwrap();
        assert_eq!(reply.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(reply.header.message_id, 42);
        assert_eq!(reply.get_token().to_vec(), vec![0xbe, 0xef]);
        assert_eq!(reply.header.code, MessageClass::Response(ResponseType::Content));
        assert_eq!(reply.payload, b"ping".to_vec());
    }

    #[tokio::test]
    async fn non_confirmable_async_request_is_created() {
        let dispatcher = echo_dispatcher().await;
        let datagram = request(MessageType::NonConfirmable, "echo", b"x", true);
        let reply = handle_datagram(&dispatcher, &datagram, peer()).await.unwrap();
        let reply = Packet::from_bytes(&reply).unwrap();
        assert_eq!(reply.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(reply.header.code, MessageClass::Response(ResponseType::Created));
        assert!(reply.payload.is_empty());
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let dispatcher = echo_dispatcher().await;
        let datagram = request(MessageType::Confirmable, "missing", b"", false);
        let reply = handle_datagram(&dispatcher, &datagram, peer()).await.unwrap();
        let reply = Packet::from_bytes(&reply).unwrap();
        assert_eq!(reply.header.code, MessageClass::Response(ResponseType::NotFound));
    }

    #[tokio::test]
    async fn drops_garbage_and_responses() {
        let dispatcher = echo_dispatcher().await;
        assert!(handle_datagram(&dispatcher, &[0xff], peer()).await.is_none());

        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Acknowledgement);
        packet.header.code = MessageClass::Response(ResponseType::Content);
        let datagram = packet.to_bytes().unwrap();
        assert!(handle_datagram(&dispatcher, &datagram, peer()).await.is_none());
    }

    #[tokio::test]
    async fn serves_over_udp() {
        let dispatcher = Arc::new(echo_dispatcher().await);
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        tokio::spawn(serve_socket(socket, dispatcher));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let datagram = request(MessageType::Confirmable, "echo", b"over-udp", false);
        client.send_to(&datagram, addr).await.unwrap();

        let mut buf = vec![0u8; 1500];
        let receive = client.recv_from(&mut buf);
        let (len, _) = tokio::time::timeout(std::time::Duration::from_secs(5), receive)
            .await
            .unwrap()
            .unwrap();
        let reply = Packet::from_bytes(&buf[..len]).unwrap();
        assert_eq!(reply.payload, b"over-udp".to_vec());
    }
}
