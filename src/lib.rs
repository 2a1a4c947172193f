//! mdns-core - the core of a Multicast DNS engine (RFC 6762).
//!
//! This library handles the multicast transport and message dispatch layer
//! of mDNS: discovering usable network interfaces, joining the mDNS groups
//! on each of them, de-duplicating inbound datagrams, encoding and decoding
//! DNS messages with the mDNS class-bit overlays, and routing answers
//! (multicast or unicast, legacy or modern) per RFC 6762.
//!
//! The entry point is [`MulticastService`]: configure it, register
//! callbacks for inbound queries and answers, and start it.
//!
//! ```no_run
//! use mdns_core::{MdnsConfig, MulticastService, RecordType};
//!
//! # async fn run() -> mdns_core::Result<()> {
//! let service = MulticastService::new(MdnsConfig::default());
//! let _queries = service.on_query(|event| {
//!     println!("query from {}: {}", event.remote, event.message.summary());
//! });
//! service.start().await?;
//! service.query("_http._tcp.local", RecordType::PTR).await?;
//! # Ok(())
//! # }
//! ```

pub mod dns;
pub mod error;
pub mod events;
pub mod net;
pub mod recent;
pub mod service;

pub use dns::{
    decode, encode, encode_truncated, names_equal, DnsMessage, Ipv6Scope, Question, RData,
    RecordType, ResourceRecord, ScopeSelector, MDNS_PORT,
};
pub use error::{Error, Result};
pub use events::Subscription;
pub use net::{InterfaceFilter, InterfaceInfo, InterfaceSnapshot, NetworkMonitor};
pub use recent::RecentSet;
pub use service::{MdnsConfig, MulticastService, ReceivedMessage};
