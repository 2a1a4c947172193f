//! DNS wire-format encoding.

use std::collections::HashMap;

use crate::dns::consts::{flags, CLASS_TOP_BIT};
use crate::dns::message::{DnsMessage, Question, ResourceRecord};
use crate::dns::records::RData;
use crate::error::{Error, Result};

/// Largest offset a 14-bit compression pointer can express.
const MAX_POINTER_OFFSET: usize = 0x3FFF;

/// Encode a DNS message.
///
/// Names are compressed with pointers to earlier occurrences; names that
/// start past offset 0x3FFF are written uncompressed. The QU and
/// cache-flush flags are OR'd back into the class fields.
pub fn encode(msg: &DnsMessage) -> Vec<u8> {
    let (buf, _, _) = encode_sections(msg);
    buf
}

/// Encode a DNS message into at most `max` bytes.
///
/// Trailing records are dropped until the message fits, Additional first,
/// then Authority, then Answers. The returned flag is true iff any record
/// was dropped, in which case the TC bit is set in the output. Questions
/// are never dropped; if the header and questions alone exceed `max` the
/// encode fails.
pub fn encode_truncated(msg: &DnsMessage, max: usize) -> Result<(Vec<u8>, bool)> {
    let (mut buf, base, record_ends) = encode_sections(msg);
    if buf.len() <= max {
        return Ok((buf, false));
    }
    if base > max {
        return Err(Error::MessageTooLarge { size: base, max });
    }

    // Record ends are in answer/authority/additional order, so keeping the
    // longest fitting prefix drops from the tail of the message: Additional
    // records go first, then Authority, then Answers. Compression pointers
    // only target earlier offsets, so a prefix stays self-contained.
    let kept = record_ends.iter().take_while(|&&end| end <= max).count();
    let end = record_ends.get(kept.wrapping_sub(1)).copied().unwrap_or(base);
    buf.truncate(end);

    let ancount = kept.min(msg.answers.len());
    let nscount = kept
        .saturating_sub(msg.answers.len())
        .min(msg.authorities.len());
    let arcount = kept.saturating_sub(msg.answers.len() + msg.authorities.len());

    // Patch the truncated flag and section counts in the header.
    let tc_flags = msg.flags | flags::TC;
    buf[2..4].copy_from_slice(&tc_flags.to_be_bytes());
    buf[6..8].copy_from_slice(&(ancount as u16).to_be_bytes());
    buf[8..10].copy_from_slice(&(nscount as u16).to_be_bytes());
    buf[10..12].copy_from_slice(&(arcount as u16).to_be_bytes());

    Ok((buf, true))
}

/// Encode the full message, returning the buffer, the offset after the
/// question section, and the end offset of each record in section order.
fn encode_sections(msg: &DnsMessage) -> (Vec<u8>, usize, Vec<usize>) {
    let mut enc = Encoder {
        buf: Vec::with_capacity(512),
        names: HashMap::new(),
    };

    enc.write_u16(msg.id);
    enc.write_u16(msg.flags);
    enc.write_u16(msg.questions.len() as u16);
    enc.write_u16(msg.answers.len() as u16);
    enc.write_u16(msg.authorities.len() as u16);
    enc.write_u16(msg.additionals.len() as u16);

    for question in &msg.questions {
        enc.write_question(question);
    }
    let base = enc.buf.len();

    let mut record_ends = Vec::new();
    for record in msg
        .answers
        .iter()
        .chain(&msg.authorities)
        .chain(&msg.additionals)
    {
        enc.write_record(record);
        record_ends.push(enc.buf.len());
    }

    (enc.buf, base, record_ends)
}

struct Encoder {
    buf: Vec<u8>,
    /// Offsets of name suffixes already written, for compression.
    names: HashMap<String, u16>,
}

impl Encoder {
    fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn write_character_string(&mut self, string: &[u8]) {
        let len = string.len().min(255);
        self.write_u8(len as u8);
        self.buf.extend_from_slice(&string[..len]);
    }

    fn write_label(&mut self, label: &str) {
        let bytes = label.as_bytes();
        debug_assert!(bytes.len() <= 63, "label longer than 63 bytes");
        let len = bytes.len().min(63);
        self.write_u8(len as u8);
        self.buf.extend_from_slice(&bytes[..len]);
    }

    /// Write a name, compressing against suffixes already in the message.
    fn write_name(&mut self, name: &str) {
        let name = name.strip_suffix('.').unwrap_or(name);
        if name.is_empty() {
            self.write_u8(0);
            return;
        }

        let mut here = 0;
        while here < name.len() {
            let remaining = &name[here..];
            if let Some(&offset) = self.names.get(remaining) {
                self.write_u16(0xC000 | offset);
                return;
            }

            // Remember this suffix so later names can point at it. Offsets
            // beyond the 14-bit pointer range cannot be targets.
            if self.buf.len() <= MAX_POINTER_OFFSET {
                self.names.insert(remaining.to_string(), self.buf.len() as u16);
            }

            let stop = remaining.find('.').map_or(name.len(), |i| here + i);
            self.write_label(&name[here..stop]);
            here = stop + 1;
        }
        self.write_u8(0);
    }

    /// Write a name as plain labels, never emitting a pointer.
    fn write_name_uncompressed(&mut self, name: &str) {
        let name = name.strip_suffix('.').unwrap_or(name);
        for label in name.split('.').filter(|l| !l.is_empty()) {
            self.write_label(label);
        }
        self.write_u8(0);
    }

    fn write_question(&mut self, question: &Question) {
        self.write_name(&question.name);
        self.write_u16(question.qtype.to_u16());
        let mut class = question.class;
        if question.unicast_response {
            class |= CLASS_TOP_BIT;
        }
        self.write_u16(class);
    }

    fn write_record(&mut self, record: &ResourceRecord) {
        self.write_name(&record.name);
        self.write_u16(record.rtype().to_u16());
        let mut class = record.class;
        if record.cache_flush {
            class |= CLASS_TOP_BIT;
        }
        self.write_u16(class);
        self.write_u32(record.ttl);

        // Length is patched once the data is written.
        let length_pos = self.buf.len();
        self.write_u16(0);
        let data_start = self.buf.len();
        self.write_rdata(&record.rdata);
        let rdlength = (self.buf.len() - data_start) as u16;
        self.buf[length_pos..length_pos + 2].copy_from_slice(&rdlength.to_be_bytes());
    }

    fn write_rdata(&mut self, rdata: &RData) {
        match rdata {
            RData::A(addr) => self.buf.extend_from_slice(&addr.octets()),
            RData::Aaaa(addr) => self.buf.extend_from_slice(&addr.octets()),
            RData::Ptr(target) => self.write_name(target),
            // SRV targets stay uncompressed per RFC 2782.
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                self.write_u16(*priority);
                self.write_u16(*weight);
                self.write_u16(*port);
                self.write_name_uncompressed(target);
            }
            RData::Txt(strings) => {
                if strings.is_empty() {
                    // An empty TXT record still needs one empty string.
                    self.write_u8(0);
                } else {
                    for string in strings {
                        self.write_character_string(string);
                    }
                }
            }
            RData::Hinfo { cpu, os } => {
                self.write_character_string(cpu.as_bytes());
                self.write_character_string(os.as_bytes());
            }
            RData::Unknown { data, .. } => self.buf.extend_from_slice(data),
        }
    }
}
