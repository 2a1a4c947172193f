//! Multicast socket creation and configuration.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::dns::consts::{MDNS_PORT, MULTICAST_ADDRESS_V4, MULTICAST_ADDRESS_V6};

/// Create a receiver socket for one address family.
///
/// The socket is bound to the wildcard address on port 5353 with address
/// reuse enabled and a TTL of 255. Multicast group memberships are joined
/// per interface afterwards.
pub fn multicast_receiver(ipv6: bool) -> io::Result<UdpSocket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    #[cfg(target_os = "linux")]
    socket.set_reuse_port(true)?;

    let bind_addr: SocketAddr = if ipv6 {
        socket.set_only_v6(true)?;
        SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0).into()
    } else {
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into()
    };
    socket.bind(&bind_addr.into())?;

    if ipv6 {
        socket.set_unicast_hops_v6(255)?;
        socket.set_multicast_hops_v6(255)?;
    } else {
        socket.set_ttl(255)?;
        socket.set_multicast_ttl_v4(255)?;
    }

    into_tokio(socket)
}

/// Create a sender socket bound to one local unicast address.
///
/// The socket is bound to `(local, 5353)`, joins the mDNS group with that
/// interface as the outgoing one, and sends with a multicast TTL of 255.
/// Multicast loopback stays enabled so other responders on this host see
/// our packets.
pub fn multicast_sender(local: IpAddr, ifindex: u32) -> io::Result<UdpSocket> {
    match local {
        IpAddr::V4(v4) => multicast_sender_v4(v4),
        IpAddr::V6(v6) => multicast_sender_v6(v6, ifindex),
    }
}

fn multicast_sender_v4(local: Ipv4Addr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    #[cfg(target_os = "linux")]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddrV4::new(local, MDNS_PORT);
    socket.bind(&bind_addr.into())?;

    socket.set_multicast_if_v4(&local)?;
    socket.join_multicast_v4(&MULTICAST_ADDRESS_V4, &local)?;
    socket.set_ttl(255)?;
    socket.set_multicast_ttl_v4(255)?;
    socket.set_multicast_loop_v4(true)?;

    into_tokio(socket)
}

fn multicast_sender_v6(local: Ipv6Addr, ifindex: u32) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    #[cfg(target_os = "linux")]
    socket.set_reuse_port(true)?;
    socket.set_only_v6(true)?;

    // Link-local addresses only bind with their scope id.
    let scope = if is_link_local_v6(local) { ifindex } else { 0 };
    let bind_addr = SocketAddrV6::new(local, MDNS_PORT, 0, scope);
    socket.bind(&bind_addr.into())?;

    socket.set_multicast_if_v6(ifindex)?;
    socket.join_multicast_v6(&MULTICAST_ADDRESS_V6, ifindex)?;
    socket.set_unicast_hops_v6(255)?;
    socket.set_multicast_hops_v6(255)?;
    socket.set_multicast_loop_v6(true)?;

    into_tokio(socket)
}

/// Create a unicast socket for one address family, bound to an ephemeral
/// port. Used for unicast answers to legacy queriers.
pub fn unicast_sender(ipv6: bool) -> io::Result<UdpSocket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    let bind_addr: SocketAddr = if ipv6 {
        socket.set_only_v6(true)?;
        SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0).into()
    } else {
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into()
    };
    socket.bind(&bind_addr.into())?;
    socket.set_ttl(255)?;

    into_tokio(socket)
}

fn is_link_local_v6(addr: Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

fn into_tokio(socket: Socket) -> io::Result<UdpSocket> {
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}
