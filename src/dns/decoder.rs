//! DNS wire-format decoding.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::dns::consts::{RecordType, CLASS_MASK, CLASS_TOP_BIT};
use crate::dns::message::{DnsMessage, Question, ResourceRecord};
use crate::dns::records::RData;
use crate::error::{Error, Result};

/// Decode a DNS message from raw packet bytes.
///
/// The top bit of each class field is split off into the QU flag
/// (questions) or the cache-flush flag (records); the remaining 15 bits
/// form the effective class. Record types without a typed representation
/// are kept as opaque RDATA.
pub fn decode(data: &[u8]) -> Result<DnsMessage> {
    let mut dec = Decoder { data, pos: 0 };

    let id = dec.read_u16()?;
    let flags = dec.read_u16()?;
    let qdcount = dec.read_u16()? as usize;
    let ancount = dec.read_u16()? as usize;
    let nscount = dec.read_u16()? as usize;
    let arcount = dec.read_u16()? as usize;

    let mut msg = DnsMessage {
        id,
        flags,
        ..Default::default()
    };

    for _ in 0..qdcount {
        msg.questions.push(dec.read_question()?);
    }
    for _ in 0..ancount {
        msg.answers.push(dec.read_record()?);
    }
    for _ in 0..nscount {
        msg.authorities.push(dec.read_record()?);
    }
    for _ in 0..arcount {
        msg.additionals.push(dec.read_record()?);
    }

    Ok(msg)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::Malformed("unexpected end of packet".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| Error::Malformed("unexpected end of packet".to_string()))?;
        self.pos += len;
        Ok(slice)
    }

    /// Read a length-prefixed `<character-string>`.
    fn read_character_string(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.read_slice(len)
    }

    /// Parse a DNS name starting at the current position, following
    /// compression pointers.
    ///
    /// Each pointer must target an offset strictly before the previous
    /// one, which rejects pointer cycles; pointers past the end of the
    /// buffer fail as malformed.
    fn read_name(&mut self) -> Result<String> {
        let mut labels: Vec<String> = Vec::new();
        let mut cursor = self.pos;
        // Offsets must strictly decrease across pointer jumps.
        let mut floor = self.pos;
        let mut end = None;

        loop {
            let length = *self
                .data
                .get(cursor)
                .ok_or_else(|| Error::Malformed("name extends past end of packet".to_string()))?
                as usize;

            match length & 0xC0 {
                0xC0 => {
                    let low = *self.data.get(cursor + 1).ok_or_else(|| {
                        Error::Malformed("truncated compression pointer".to_string())
                    })? as usize;
                    let pointer = ((length & 0x3F) << 8) | low;
                    if pointer >= floor {
                        return Err(Error::Malformed("compression pointer loop".to_string()));
                    }
                    if pointer >= self.data.len() {
                        return Err(Error::Malformed(
                            "compression pointer past end of packet".to_string(),
                        ));
                    }
                    end.get_or_insert(cursor + 2);
                    floor = pointer;
                    cursor = pointer;
                }
                0x00 => {
                    cursor += 1;
                    if length == 0 {
                        break;
                    }
                    let label = self.data.get(cursor..cursor + length).ok_or_else(|| {
                        Error::Malformed("label extends past end of packet".to_string())
                    })?;
                    labels.push(String::from_utf8_lossy(label).into_owned());
                    cursor += length;
                }
                // 01 and 10 in the top bits are reserved.
                _ => return Err(Error::Malformed("reserved label type".to_string())),
            }
        }

        self.pos = end.unwrap_or(cursor);
        Ok(labels.join("."))
    }

    fn read_question(&mut self) -> Result<Question> {
        let name = self.read_name()?;
        let qtype = RecordType::from_u16(self.read_u16()?);
        let class = self.read_u16()?;
        Ok(Question {
            name,
            qtype,
            class: class & CLASS_MASK,
            unicast_response: class & CLASS_TOP_BIT != 0,
        })
    }

    fn read_record(&mut self) -> Result<ResourceRecord> {
        let name = self.read_name()?;
        let rtype = self.read_u16()?;
        let class = self.read_u16()?;
        let ttl = self.read_u32()?;
        let rdlength = self.read_u16()? as usize;
        let rdata_start = self.pos;
        if rdata_start + rdlength > self.data.len() {
            return Err(Error::Malformed(
                "record data extends past end of packet".to_string(),
            ));
        }

        let rdata = self.read_rdata(RecordType::from_u16(rtype), rtype, rdata_start, rdlength)?;
        if self.pos > rdata_start + rdlength {
            return Err(Error::Malformed(
                "record data overruns its declared length".to_string(),
            ));
        }
        self.pos = rdata_start + rdlength;

        Ok(ResourceRecord {
            name,
            class: class & CLASS_MASK,
            cache_flush: class & CLASS_TOP_BIT != 0,
            ttl,
            rdata,
        })
    }

    fn read_rdata(
        &mut self,
        rtype: RecordType,
        raw_type: u16,
        start: usize,
        len: usize,
    ) -> Result<RData> {
        match rtype {
            RecordType::A => {
                let octets: [u8; 4] = self
                    .read_slice(len)?
                    .try_into()
                    .map_err(|_| Error::Malformed("A record is not 4 bytes".to_string()))?;
                Ok(RData::A(Ipv4Addr::from(octets)))
            }
            RecordType::AAAA => {
                let octets: [u8; 16] = self
                    .read_slice(len)?
                    .try_into()
                    .map_err(|_| Error::Malformed("AAAA record is not 16 bytes".to_string()))?;
                Ok(RData::Aaaa(Ipv6Addr::from(octets)))
            }
            // PTR and SRV targets may use compression into the enclosing
            // message, so names are read in message context.
            RecordType::PTR => Ok(RData::Ptr(self.read_name()?)),
            RecordType::SRV => {
                let priority = self.read_u16()?;
                let weight = self.read_u16()?;
                let port = self.read_u16()?;
                let target = self.read_name()?;
                Ok(RData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                })
            }
            RecordType::TXT => {
                let mut strings = Vec::new();
                while self.pos < start + len {
                    strings.push(self.read_character_string()?.to_vec());
                }
                Ok(RData::Txt(strings))
            }
            RecordType::HINFO => {
                let cpu = String::from_utf8_lossy(self.read_character_string()?).into_owned();
                let os = String::from_utf8_lossy(self.read_character_string()?).into_owned();
                Ok(RData::Hinfo { cpu, os })
            }
            _ => Ok(RData::Unknown {
                rtype: raw_type,
                data: self.read_slice(len)?.to_vec(),
            }),
        }
    }
}
