//! Network interface discovery, sockets, and multicast transport.

pub mod interface;
pub mod socket;
pub mod transport;

pub use interface::{
    usable_interfaces, InterfaceFilter, InterfaceInfo, InterfaceSnapshot, NetworkMonitor,
};
pub use transport::{MulticastTransport, TransportOptions};
