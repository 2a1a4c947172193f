//! DNS message data types.

use crate::dns::consts::{flags, RecordType, CLASS_IN};
use crate::dns::records::RData;

/// A question in the question section.
///
/// The class is the 15-bit effective class; the top bit of the wire class
/// field is carried separately as [`Question::unicast_response`] (the QU
/// bit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Queried name, labels joined with dots and no trailing dot.
    pub name: String,
    /// Queried record type.
    pub qtype: RecordType,
    /// Effective class (typically 1 for IN).
    pub class: u16,
    /// QU bit: the querier accepts a unicast reply.
    pub unicast_response: bool,
}

impl Question {
    /// A question for all records of `name` in the internet class.
    pub fn new(name: impl Into<String>, qtype: RecordType) -> Self {
        Self {
            name: name.into(),
            qtype,
            class: CLASS_IN,
            unicast_response: false,
        }
    }
}

/// A single resource record.
///
/// The class is the 15-bit effective class; the top bit of the wire class
/// field is carried separately as [`ResourceRecord::cache_flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Record name, labels joined with dots and no trailing dot.
    pub name: String,
    /// Effective class (typically 1 for IN).
    pub class: u16,
    /// Cache-flush bit: this record is unique and supersedes peers.
    pub cache_flush: bool,
    /// Time-to-live in seconds. Zero announces withdrawal of the name.
    pub ttl: u32,
    /// Typed record data.
    pub rdata: RData,
}

impl ResourceRecord {
    /// Create a record in the internet class.
    pub fn new(name: impl Into<String>, ttl: u32, rdata: RData) -> Self {
        Self {
            name: name.into(),
            class: CLASS_IN,
            cache_flush: false,
            ttl,
            rdata,
        }
    }

    /// The record type, derived from the data variant.
    pub fn rtype(&self) -> RecordType {
        self.rdata.record_type()
    }
}

/// A DNS message: header plus the four record sections.
///
/// Header flags are stored as the raw 16-bit field so that reserved bits
/// survive a decode/encode round trip; accessors extract the individual
/// flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsMessage {
    /// Transaction id. Zero for multicast mDNS messages.
    pub id: u16,
    /// Raw header flags field.
    pub flags: u16,
    /// Question section.
    pub questions: Vec<Question>,
    /// Answer section.
    pub answers: Vec<ResourceRecord>,
    /// Authority section.
    pub authorities: Vec<ResourceRecord>,
    /// Additional section.
    pub additionals: Vec<ResourceRecord>,
}

impl DnsMessage {
    /// An empty query message.
    pub fn new_query() -> Self {
        Self::default()
    }

    /// An empty response message with QR set.
    pub fn new_response() -> Self {
        Self {
            flags: flags::QR,
            ..Self::default()
        }
    }

    /// Whether this is a response (QR bit).
    pub fn is_response(&self) -> bool {
        self.flags & flags::QR != 0
    }

    /// Whether this is a query (QR bit clear).
    pub fn is_query(&self) -> bool {
        !self.is_response()
    }

    /// Set or clear the QR bit.
    pub fn set_response(&mut self, response: bool) {
        self.set_flag(flags::QR, response);
    }

    /// The 4-bit opcode. Zero is a standard query.
    pub fn opcode(&self) -> u8 {
        ((self.flags & flags::OPCODE_MASK) >> flags::OPCODE_SHIFT) as u8
    }

    /// Set the opcode field.
    pub fn set_opcode(&mut self, opcode: u8) {
        self.flags = (self.flags & !flags::OPCODE_MASK)
            | ((u16::from(opcode) << flags::OPCODE_SHIFT) & flags::OPCODE_MASK);
    }

    /// The 4-bit response code. Zero is NoError.
    pub fn rcode(&self) -> u8 {
        (self.flags & flags::RCODE_MASK) as u8
    }

    /// Set the response code field.
    pub fn set_rcode(&mut self, rcode: u8) {
        self.flags = (self.flags & !flags::RCODE_MASK) | (u16::from(rcode) & flags::RCODE_MASK);
    }

    /// Authoritative answer bit.
    pub fn is_authoritative(&self) -> bool {
        self.flags & flags::AA != 0
    }

    /// Set or clear the AA bit.
    pub fn set_authoritative(&mut self, aa: bool) {
        self.set_flag(flags::AA, aa);
    }

    /// Truncated bit.
    pub fn is_truncated(&self) -> bool {
        self.flags & flags::TC != 0
    }

    /// Set or clear the TC bit.
    pub fn set_truncated(&mut self, tc: bool) {
        self.set_flag(flags::TC, tc);
    }

    /// Recursion desired bit.
    pub fn recursion_desired(&self) -> bool {
        self.flags & flags::RD != 0
    }

    /// Recursion available bit.
    pub fn recursion_available(&self) -> bool {
        self.flags & flags::RA != 0
    }

    /// Set or clear the RA bit.
    pub fn set_recursion_available(&mut self, ra: bool) {
        self.set_flag(flags::RA, ra);
    }

    /// Authentic data bit.
    pub fn authentic_data(&self) -> bool {
        self.flags & flags::AD != 0
    }

    /// Set or clear the AD bit.
    pub fn set_authentic_data(&mut self, ad: bool) {
        self.set_flag(flags::AD, ad);
    }

    /// Checking disabled bit.
    pub fn checking_disabled(&self) -> bool {
        self.flags & flags::CD != 0
    }

    /// Set or clear the CD bit.
    pub fn set_checking_disabled(&mut self, cd: bool) {
        self.set_flag(flags::CD, cd);
    }

    fn set_flag(&mut self, mask: u16, value: bool) {
        if value {
            self.flags |= mask;
        } else {
            self.flags &= !mask;
        }
    }

    /// Iterate mutably over the answer, authority and additional sections.
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ResourceRecord> {
        self.answers
            .iter_mut()
            .chain(self.authorities.iter_mut())
            .chain(self.additionals.iter_mut())
    }

    /// Format the message as a short human-readable summary.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        parts.push(if self.is_response() {
            "response".to_string()
        } else {
            "query".to_string()
        });

        let mut counts = Vec::new();
        if !self.questions.is_empty() {
            counts.push(format!("{}q", self.questions.len()));
        }
        if !self.answers.is_empty() {
            counts.push(format!("{}an", self.answers.len()));
        }
        if !self.authorities.is_empty() {
            counts.push(format!("{}ns", self.authorities.len()));
        }
        if !self.additionals.is_empty() {
            counts.push(format!("{}ar", self.additionals.len()));
        }
        if !counts.is_empty() {
            parts.push(format!("[{}]", counts.join("/")));
        }

        let mut record_strs = Vec::new();
        for record in self.answers.iter().take(3) {
            record_strs.push(format!("{} {}", record.rtype().name(), record.name));
        }
        if record_strs.is_empty() {
            for question in self.questions.iter().take(3) {
                record_strs.push(format!("{}? {}", question.qtype.name(), question.name));
            }
        }
        if !record_strs.is_empty() {
            parts.push(format!(": {}", record_strs.join(", ")));
        }

        parts.join(" ")
    }
}

/// Case-insensitive comparison of two names by label sequence.
pub fn names_equal(a: &str, b: &str) -> bool {
    let mut a = a.split('.').filter(|l| !l.is_empty());
    let mut b = b.split('.').filter(|l| !l.is_empty());
    loop {
        match (a.next(), b.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x.eq_ignore_ascii_case(y) => {}
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_accessors() {
        let mut msg = DnsMessage::new_query();
        assert!(msg.is_query());

        msg.set_response(true);
        msg.set_authoritative(true);
        msg.set_truncated(true);
        assert!(msg.is_response());
        assert!(msg.is_authoritative());
        assert!(msg.is_truncated());
        assert_eq!(msg.flags, 0x8600);

        msg.set_truncated(false);
        assert!(!msg.is_truncated());
    }

    #[test]
    fn test_opcode_and_rcode() {
        let mut msg = DnsMessage::new_query();
        msg.set_opcode(2);
        msg.set_rcode(3);
        assert_eq!(msg.opcode(), 2);
        assert_eq!(msg.rcode(), 3);
        assert_eq!(msg.flags, 0x1003);

        msg.set_opcode(0);
        assert_eq!(msg.opcode(), 0);
        assert_eq!(msg.rcode(), 3);
    }

    #[test]
    fn test_reserved_bits_untouched() {
        // The Z bit (0x0040) has no accessor and must survive flag edits.
        let mut msg = DnsMessage {
            flags: 0x0040,
            ..Default::default()
        };
        msg.set_authoritative(true);
        msg.set_authoritative(false);
        assert_eq!(msg.flags, 0x0040);
    }

    #[test]
    fn test_names_equal() {
        assert!(names_equal("Host.Local", "host.local"));
        assert!(names_equal("host.local", "host.local."));
        assert!(!names_equal("host.local", "other.local"));
        assert!(!names_equal("a.host.local", "host.local"));
    }

    #[test]
    fn test_summary() {
        let mut msg = DnsMessage::new_query();
        msg.questions
            .push(Question::new("_http._tcp.local", RecordType::PTR));
        let summary = msg.summary();
        assert!(summary.contains("query"));
        assert!(summary.contains("PTR? _http._tcp.local"));
    }
}
