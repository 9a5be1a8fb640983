use std::net::{IpAddr, SocketAddr};

/// Path every execution unit serves invocations on.
pub const FUNCTION_PATH: &str = "/fn";
/// Liveness path of every execution unit.
pub const HEALTH_PATH: &str = "/health";

pub fn function_url(endpoint: &str, port: u16) -> String {
    format!("http://{}{}", authority(endpoint, port), FUNCTION_PATH)
}

pub fn health_url(endpoint: &str, port: u16) -> String {
    format!("http://{}{}", authority(endpoint, port), HEALTH_PATH)
}

/// Host plus port for an endpoint address. Addresses that already carry a
/// port are kept as they are; bare IPv6 addresses get bracketed.
fn authority(endpoint: &str, port: u16) -> String {
    if endpoint.parse::<SocketAddr>().is_ok() {
        return endpoint.to_string();
    }
    match endpoint.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{}]:{}", ip, port),
        Ok(IpAddr::V4(ip)) => format!("{}:{}", ip, port),
        Err(_) => {
            if has_port(endpoint) {
                endpoint.to_string()
            } else {
                format!("{}:{}", endpoint, port)
            }
        }
    }
}

fn has_port(host: &str) -> bool {
    match host.rsplit_once(':') {
        Some((name, port)) => {
            !name.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
