//! Typed resource record data.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::dns::consts::RecordType;

/// Record data as a tagged variant over the record types the engine
/// understands. Types it does not understand are carried opaque and
/// round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    /// IPv4 host address.
    A(Ipv4Addr),
    /// IPv6 host address.
    Aaaa(Ipv6Addr),
    /// Domain name pointer.
    Ptr(String),
    /// Service locator (RFC 2782).
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    /// Text strings, kept as raw character-strings.
    Txt(Vec<Vec<u8>>),
    /// Host information.
    Hinfo { cpu: String, os: String },
    /// Any record type without a typed representation.
    Unknown {
        /// Raw record type value.
        rtype: u16,
        /// Raw RDATA bytes as received.
        data: Vec<u8>,
    },
}

impl RData {
    /// The record type this data belongs to.
    pub fn record_type(&self) -> RecordType {
        match self {
            RData::A(_) => RecordType::A,
            RData::Aaaa(_) => RecordType::AAAA,
            RData::Ptr(_) => RecordType::PTR,
            RData::Srv { .. } => RecordType::SRV,
            RData::Txt(_) => RecordType::TXT,
            RData::Hinfo { .. } => RecordType::HINFO,
            RData::Unknown { rtype, .. } => RecordType::from_u16(*rtype),
        }
    }

    /// For TXT data: the `key=value` pairs. Strings without `=` become a
    /// key with an empty value.
    pub fn txt_pairs(&self) -> Vec<(String, String)> {
        let RData::Txt(strings) = self else {
            return Vec::new();
        };
        strings
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| {
                let text = String::from_utf8_lossy(s);
                match text.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (text.into_owned(), String::new()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_of_data() {
        assert_eq!(
            RData::A(Ipv4Addr::LOCALHOST).record_type(),
            RecordType::A
        );
        assert_eq!(
            RData::Ptr("host.local".to_string()).record_type(),
            RecordType::PTR
        );
        assert_eq!(
            RData::Unknown {
                rtype: 47,
                data: vec![]
            }
            .record_type(),
            RecordType::NSEC
        );
    }

    #[test]
    fn test_txt_pairs() {
        let rdata = RData::Txt(vec![
            b"fn=Living Room".to_vec(),
            b"enabled".to_vec(),
        ]);
        let pairs = rdata.txt_pairs();
        assert_eq!(
            pairs[0],
            ("fn".to_string(), "Living Room".to_string())
        );
        assert_eq!(pairs[1], ("enabled".to_string(), String::new()));
    }

    #[test]
    fn test_txt_pairs_on_other_data() {
        assert!(RData::A(Ipv4Addr::LOCALHOST).txt_pairs().is_empty());
    }
}
