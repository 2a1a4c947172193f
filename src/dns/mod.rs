//! DNS wire codec with mDNS overlays.

pub mod consts;
pub mod decoder;
pub mod encoder;
pub mod message;
pub mod records;

pub use consts::{
    Ipv6Scope, RecordType, ScopeSelector, CLASS_IN, IP_UDP_OVERHEAD, MAX_PACKET_SIZE,
    MAX_PAYLOAD_SIZE, MDNS_PORT, MULTICAST_ADDRESS_V4, MULTICAST_ADDRESS_V6,
};
pub use decoder::decode;
pub use encoder::{encode, encode_truncated};
pub use message::{names_equal, DnsMessage, Question, ResourceRecord};
pub use records::RData;
