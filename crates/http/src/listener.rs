use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

/// TCP listener with `SO_REUSEADDR` and (on unix) `SO_REUSEPORT`, so several
/// accept loops can share one address and the kernel balances between them.
pub fn bind_reuseport(addr: SocketAddr) -> Result<tokio::net::TcpListener, String> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
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
    socket
        .listen(1024)
        .map_err(|err| format!("listen failed: {}", err))?;
    let listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(listener)
        .map_err(|err| format!("tokio listener failed: {}", err))
}
