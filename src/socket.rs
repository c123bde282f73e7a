//! Socket helpers: `SO_REUSEADDR`/`SO_REUSEPORT` binding and multicast
//! group joins, needed for RTP sessions announced over SAP at a multicast
//! group.

use socket2::{Domain, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub fn bind_reuseaddr(addr: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Joins a multicast group on `socket`, bound to the interface at `iface`.
pub fn join_multicast_v4(
    socket: &std::net::UdpSocket,
    group: Ipv4Addr,
    iface: Ipv4Addr,
) -> std::io::Result<()> {
    socket.join_multicast_v4(&group, &iface)
}

pub fn is_multicast(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_multicast(),
        IpAddr::V6(v6) => v6.is_multicast(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_multicast_v4() {
        assert!(is_multicast(IpAddr::V4(Ipv4Addr::new(239, 0, 0, 1))));
        assert!(!is_multicast(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }
}
