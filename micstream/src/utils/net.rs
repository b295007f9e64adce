//! LAN address discovery

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Address other machines on the LAN can reach this host at
///
/// Connecting a UDP socket sends nothing; it only asks the OS which local
/// interface would route to the target. Falls back to loopback when there
/// is no route.
pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
