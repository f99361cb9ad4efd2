//! Local network helpers: free-port scans and the node's LAN address

use std::net::{IpAddr, Ipv4Addr, TcpListener, ToSocketAddrs, UdpSocket};

use tracing::debug;

use crate::error::{Error, Result};

/// First port tried by the HTTP server scan
pub const HTTP_PORT_START: u16 = 8000;

/// First port tried by the UDP advertiser scan
pub const UDP_PORT_START: u16 = 9000;

/// Number of candidate ports per scan
pub const PORT_SCAN_LEN: u16 = 100;

/// First TCP port in `start..start + PORT_SCAN_LEN` that can be bound on all interfaces
pub fn find_free_tcp_port(start: u16) -> Result<u16> {
    let end = start.saturating_add(PORT_SCAN_LEN);
    (start..end)
        .find(|port| TcpListener::bind((Ipv4Addr::UNSPECIFIED, *port)).is_ok())
        .ok_or(Error::NoFreePort { kind: "TCP", start, end })
}

/// First UDP port in `start..start + PORT_SCAN_LEN` that can be bound on all interfaces
pub fn find_free_udp_port(start: u16) -> Result<u16> {
    let end = start.saturating_add(PORT_SCAN_LEN);
    (start..end)
        .find(|port| UdpSocket::bind((Ipv4Addr::UNSPECIFIED, *port)).is_ok())
        .ok_or(Error::NoFreePort { kind: "UDP", start, end })
}

/// Best-effort LAN address of this host
///
/// Resolves the hostname first and keeps the first non-loopback IPv4 address.
/// Falls back to the source address the kernel would route public traffic
/// through (no packet is sent), then to loopback.
pub fn local_ip() -> IpAddr {
    if let Some(ip) = hostname_ip() {
        return ip;
    }

    if let Some(ip) = routed_ip() {
        debug!(ip = %ip, "Hostname did not resolve to a LAN address, using routed address");
        return ip;
    }

    debug!("No LAN address found, falling back to loopback");
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn hostname_ip() -> Option<IpAddr> {
    let host = hostname::get().ok()?.into_string().ok()?;
    (host.as_str(), 0)
        .to_socket_addrs()
        .ok()?
        .map(|addr| addr.ip())
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
}

fn routed_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
}

/// `http://<ip>:<port>`, the address a node advertises and serves media under
pub fn base_url(ip: IpAddr, port: u16) -> String {
    format!("http://{}:{}", ip, port)
}
