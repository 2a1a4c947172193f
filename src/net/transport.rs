//! Multicast transport: per-interface sockets, group membership, and
//! receive loops.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dns::consts::{ScopeSelector, MAX_PACKET_SIZE, MDNS_PORT, MULTICAST_ADDRESS_V4};
use crate::error::Result;
use crate::net::interface::InterfaceInfo;
use crate::net::socket;

/// Handler invoked inline for every received datagram. The next datagram
/// on the same socket is not read until the handler returns.
pub type PacketHandler = Arc<dyn Fn(SocketAddr, &[u8]) + Send + Sync>;

/// Address families and IPv6 scope selection for a transport instance.
#[derive(Clone)]
pub struct TransportOptions {
    /// Participate on IPv4.
    pub use_ipv4: bool,
    /// Participate on IPv6.
    pub use_ipv6: bool,
    /// Selects the IPv6 multicast scope for a local address.
    pub scope_selector: ScopeSelector,
}

struct Sender {
    socket: Arc<UdpSocket>,
    /// Multicast destination matching this sender's family and scope.
    destination: SocketAddr,
}

/// Sockets joined to the mDNS group on a fixed set of interfaces.
///
/// Active from construction; dropping it aborts the receive loops and
/// closes the sockets. There is no restart: an interface change replaces
/// the transport wholesale.
pub struct MulticastTransport {
    senders: HashMap<IpAddr, Sender>,
    recv_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MulticastTransport {
    /// Create receiver and sender sockets for `nics` and start one receive
    /// loop per receiver.
    ///
    /// Sender creation failures are isolated: a transient
    /// `AddrNotAvailable` (a VPN address mid-teardown, say) is skipped
    /// quietly, anything else is logged and skipped.
    pub fn bind(
        nics: &[InterfaceInfo],
        options: &TransportOptions,
        handler: PacketHandler,
    ) -> Result<Self> {
        let mut receivers: Vec<Arc<UdpSocket>> = Vec::new();

        if options.use_ipv4 {
            let receiver = socket::multicast_receiver(false)?;
            for nic in nics {
                for addr in nic.ipv4_addrs() {
                    if let Err(err) = receiver.join_multicast_v4(MULTICAST_ADDRESS_V4, addr) {
                        warn!("join on {} ({}) failed: {}", nic.name, addr, err);
                    }
                }
            }
            receivers.push(Arc::new(receiver));
        }

        if options.use_ipv6 {
            let receiver = socket::multicast_receiver(true)?;
            for nic in nics.iter().filter(|nic| nic.has_ipv6()) {
                let group = group_for_nic(nic, &options.scope_selector);
                if let Err(err) = receiver.join_multicast_v6(&group, nic.index) {
                    warn!("join on {} (scope id {}) failed: {}", nic.name, nic.index, err);
                }
            }
            receivers.push(Arc::new(receiver));
        }

        let mut senders = HashMap::new();
        for nic in nics {
            for addr in &nic.addrs {
                if addr.is_ipv4() && !options.use_ipv4 {
                    continue;
                }
                if addr.is_ipv6() && !options.use_ipv6 {
                    continue;
                }
                match socket::multicast_sender(*addr, nic.index) {
                    Ok(sock) => {
                        let destination = destination_for(*addr, nic.index, &options.scope_selector);
                        debug!("sender on {} via {}", addr, nic.name);
                        senders.insert(
                            *addr,
                            Sender {
                                socket: Arc::new(sock),
                                destination,
                            },
                        );
                    }
                    Err(err) if err.kind() == io::ErrorKind::AddrNotAvailable => {
                        debug!("skipping transient address {} on {}", addr, nic.name);
                    }
                    Err(err) => {
                        warn!("sender on {} ({}) failed: {}", nic.name, addr, err);
                    }
                }
            }
        }

        let recv_tasks = receivers
            .into_iter()
            .map(|receiver| tokio::spawn(receive_loop(receiver, Arc::clone(&handler))))
            .collect();

        Ok(Self {
            senders,
            recv_tasks: std::sync::Mutex::new(recv_tasks),
        })
    }

    /// Abort the receive loops and wait for them to finish. After this
    /// returns no further datagrams are delivered.
    pub async fn dispose(&self) {
        let tasks: Vec<JoinHandle<()>> = self.recv_tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    /// Send one datagram from every sender to its multicast group.
    ///
    /// Per-sender errors are logged and do not abort the broadcast. The
    /// call returns once every attempt has been dispatched; UDP gives no
    /// acknowledgement to wait for.
    pub async fn send(&self, packet: &[u8]) {
        for (addr, sender) in &self.senders {
            if let Err(err) = sender.socket.send_to(packet, sender.destination).await {
                warn!("send from {} failed: {}", addr, err);
            }
        }
    }

    /// Local addresses with an active sender.
    pub fn sender_addrs(&self) -> impl Iterator<Item = &IpAddr> {
        self.senders.keys()
    }
}

impl Drop for MulticastTransport {
    fn drop(&mut self) {
        for task in self.recv_tasks.lock().unwrap().iter() {
            task.abort();
        }
    }
}

/// The multicast group an interface's traffic uses, per the scope
/// selector applied to its first IPv6 address.
fn group_for_nic(nic: &InterfaceInfo, selector: &ScopeSelector) -> std::net::Ipv6Addr {
    let addr = nic
        .addrs
        .iter()
        .find(|addr| addr.is_ipv6())
        .copied()
        .unwrap_or(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED));
    selector(&addr).group()
}

fn destination_for(local: IpAddr, ifindex: u32, selector: &ScopeSelector) -> SocketAddr {
    match local {
        IpAddr::V4(_) => SocketAddrV4::new(MULTICAST_ADDRESS_V4, MDNS_PORT).into(),
        IpAddr::V6(_) => {
            SocketAddrV6::new(selector(&local).group(), MDNS_PORT, 0, ifindex).into()
        }
    }
}

/// Drain one receiver socket, handing each datagram to the dispatcher.
///
/// Runs until the socket errors out or the task is aborted on disposal.
async fn receive_loop(socket: Arc<UdpSocket>, handler: PacketHandler) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, remote)) => handler(remote, &buf[..len]),
            Err(err) => {
                debug!("receive loop ending: {}", err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::consts::Ipv6Scope;
    use std::net::Ipv6Addr;
    use std::time::Duration;

    fn link_local_selector() -> ScopeSelector {
        Arc::new(|_: &IpAddr| Ipv6Scope::LinkLocal)
    }

    #[test]
    fn test_destination_for_ipv4() {
        let dest = destination_for(
            IpAddr::V4("192.0.2.10".parse().unwrap()),
            3,
            &link_local_selector(),
        );
        assert_eq!(dest, "224.0.0.251:5353".parse().unwrap());
    }

    #[test]
    fn test_destination_for_ipv6_uses_selector_scope() {
        let selector: ScopeSelector = Arc::new(|_| Ipv6Scope::SiteLocal);
        let dest = destination_for(IpAddr::V6("fe80::1".parse().unwrap()), 7, &selector);
        let SocketAddr::V6(dest) = dest else {
            panic!("expected a v6 destination");
        };
        assert_eq!(*dest.ip(), "ff05::fb".parse::<Ipv6Addr>().unwrap());
        assert_eq!(dest.port(), MDNS_PORT);
        assert_eq!(dest.scope_id(), 7);
    }

    #[tokio::test]
    async fn test_transport_without_interfaces_has_no_senders() {
        let options = TransportOptions {
            use_ipv4: true,
            use_ipv6: false,
            scope_selector: link_local_selector(),
        };
        let Ok(transport) = MulticastTransport::bind(&[], &options, Arc::new(|_, _| {})) else {
            // Receiver creation needs permissions not present everywhere.
            return;
        };
        assert_eq!(transport.sender_addrs().count(), 0);
        // A broadcast with no senders completes immediately.
        transport.send(b"packet").await;
    }

    #[tokio::test]
    async fn test_receive_loop_delivers_in_order() {
        let receiver = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = receiver.local_addr().unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handler: PacketHandler = Arc::new(move |remote, bytes: &[u8]| {
            tx.send((remote, bytes.to_vec())).unwrap();
        });
        let task = tokio::spawn(receive_loop(receiver, handler));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"first", addr).await.unwrap();
        sender.send_to(b"second", addr).await.unwrap();

        let (remote, bytes) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote, sender.local_addr().unwrap());
        assert_eq!(bytes, b"first");
        let (_, bytes) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"second");

        task.abort();
    }
}
