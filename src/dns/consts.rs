//! Constants and enums for the mDNS wire protocol.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// mDNS IPv4 multicast group.
pub const MULTICAST_ADDRESS_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// mDNS IPv6 link-local multicast group (`FF02::FB`).
pub const MULTICAST_ADDRESS_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// mDNS port.
pub const MDNS_PORT: u16 = 5353;

/// Largest mDNS packet on the wire, including IP and UDP headers.
pub const MAX_PACKET_SIZE: usize = 9000;

/// Bytes reserved for IP and UDP headers within [`MAX_PACKET_SIZE`].
pub const IP_UDP_OVERHEAD: usize = 48;

/// Maximum UDP payload for an outbound mDNS message.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - IP_UDP_OVERHEAD;

/// Internet class.
pub const CLASS_IN: u16 = 1;

/// Mask selecting the 15-bit effective class of a question or record.
pub const CLASS_MASK: u16 = 0x7FFF;

/// Top bit of the class field: cache-flush on records, unicast-response on
/// questions.
pub const CLASS_TOP_BIT: u16 = 0x8000;

/// Default TTL applied to host records (A, AAAA, SRV, HINFO, PTR) on send.
pub const HOST_RECORD_TTL_SECS: u32 = 120;

/// Default TTL applied to all other records on send (75 minutes).
pub const NON_HOST_TTL_SECS: u32 = 4500;

/// TTL ceiling for answers to legacy unicast queries.
pub const LEGACY_TTL_CAP_SECS: u32 = 10;

/// DNS header flag masks.
pub mod flags {
    /// Query/response bit.
    pub const QR: u16 = 0x8000;
    /// Opcode field (4 bits).
    pub const OPCODE_MASK: u16 = 0x7800;
    /// Opcode field shift.
    pub const OPCODE_SHIFT: u16 = 11;
    /// Authoritative answer.
    pub const AA: u16 = 0x0400;
    /// Truncated.
    pub const TC: u16 = 0x0200;
    /// Recursion desired.
    pub const RD: u16 = 0x0100;
    /// Recursion available.
    pub const RA: u16 = 0x0080;
    /// Authentic data.
    pub const AD: u16 = 0x0020;
    /// Checking disabled.
    pub const CD: u16 = 0x0010;
    /// Response code field (4 bits).
    pub const RCODE_MASK: u16 = 0x000F;
}

/// DNS record types relevant to mDNS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    HINFO,
    MX,
    TXT,
    AAAA,
    SRV,
    NSEC,
    ANY,
    /// Unknown record type with raw value.
    #[serde(untagged)]
    Unknown(u16),
}

impl RecordType {
    /// Convert from a raw u16 value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            13 => RecordType::HINFO,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            47 => RecordType::NSEC,
            255 => RecordType::ANY,
            _ => RecordType::Unknown(value),
        }
    }

    /// Convert to raw u16 value.
    pub fn to_u16(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::HINFO => 13,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::NSEC => 47,
            RecordType::ANY => 255,
            RecordType::Unknown(v) => v,
        }
    }

    /// Whether records of this type describe a host and get the short
    /// default TTL on send.
    pub fn is_host_record(self) -> bool {
        matches!(
            self,
            RecordType::A
                | RecordType::AAAA
                | RecordType::SRV
                | RecordType::HINFO
                | RecordType::PTR
        )
    }

    /// Get human-readable name for the record type.
    pub fn name(&self) -> String {
        match self {
            RecordType::A => "A".to_string(),
            RecordType::NS => "NS".to_string(),
            RecordType::CNAME => "CNAME".to_string(),
            RecordType::SOA => "SOA".to_string(),
            RecordType::PTR => "PTR".to_string(),
            RecordType::HINFO => "HINFO".to_string(),
            RecordType::MX => "MX".to_string(),
            RecordType::TXT => "TXT".to_string(),
            RecordType::AAAA => "AAAA".to_string(),
            RecordType::SRV => "SRV".to_string(),
            RecordType::NSEC => "NSEC".to_string(),
            RecordType::ANY => "ANY".to_string(),
            RecordType::Unknown(v) => format!("TYPE{}", v),
        }
    }
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        value.to_u16()
    }
}

/// IPv6 multicast scope, the `x` digit in `FF0x::FB` (RFC 4291 section 2.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ipv6Scope {
    InterfaceLocal,
    #[default]
    LinkLocal,
    RealmLocal,
    AdminLocal,
    SiteLocal,
    Organization,
    Global,
}

impl Ipv6Scope {
    /// The RFC 4291 scope digit.
    pub fn digit(self) -> u16 {
        match self {
            Ipv6Scope::InterfaceLocal => 0x1,
            Ipv6Scope::LinkLocal => 0x2,
            Ipv6Scope::RealmLocal => 0x3,
            Ipv6Scope::AdminLocal => 0x4,
            Ipv6Scope::SiteLocal => 0x5,
            Ipv6Scope::Organization => 0x8,
            Ipv6Scope::Global => 0xE,
        }
    }

    /// The mDNS multicast group for this scope, `FF0x::FB`.
    pub fn group(self) -> Ipv6Addr {
        Ipv6Addr::new(0xff00 | self.digit(), 0, 0, 0, 0, 0, 0, 0xfb)
    }
}

/// Selects the IPv6 multicast scope used when sending from a local address.
///
/// The default selector returns [`Ipv6Scope::LinkLocal`] for every address,
/// yielding the standard `FF02::FB` destination.
pub type ScopeSelector = std::sync::Arc<dyn Fn(&IpAddr) -> Ipv6Scope + Send + Sync>;
