use std::net::IpAddr;
use std::net::UdpSocket;

/// accept ip either like 127.0.0.1 or docker host name: node1
pub(crate) fn address_str(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// Joins a homepage URL and a relative path with exactly one slash.
pub(crate) fn join_url(
    base: &str,
    path: &str,
) -> String {
    let base = address_str(base);
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Best-effort outward-facing address of this host.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// interface it would route through.
pub fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip.to_string()),
        IpAddr::V6(ip) if !ip.is_unspecified() => Some(ip.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a:8080/", "/configs/x"), "http://a:8080/configs/x");
        assert_eq!(join_url("a:8080", "configs/x"), "http://a:8080/configs/x");
        assert_eq!(join_url("https://a", "services/config"), "https://a/services/config");
    }
}
