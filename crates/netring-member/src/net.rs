use std::net::UdpSocket;

/// Address advertised to peers in the registration payload. An explicit
/// `host_ip` wins; otherwise the kernel picks the outbound interface for a
/// public destination and we read the chosen source address. No packet is
/// sent.
pub fn advertise_ip(host_ip: Option<&str>) -> String {
    if let Some(ip) = host_ip.filter(|ip| !ip.is_empty()) {
        tracing::info!(ip, "using configured advertise ip");
        return ip.to_string();
    }

    match detect_outbound_ip() {
        Some(ip) => {
            tracing::info!(ip = %ip, "auto-detected advertise ip");
            ip
        }
        None => {
            tracing::warn!("failed to auto-detect advertise ip, falling back to 127.0.0.1");
            "127.0.0.1".to_string()
        }
    }
}

fn detect_outbound_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_loopback() {
        return None;
    }
    Some(ip.to_string())
}
