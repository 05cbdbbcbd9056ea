//! DNS message parsing and construction.
//!
//! Implements the RFC 1035 subset the forwarder needs: headers, questions,
//! and A/AAAA answer records. Compression pointers are accepted on decode
//! (bounded indirection) but never emitted on encode.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

/// Maximum size of a DNS datagram (with some headroom).
pub const MAX_PACKET_SIZE: usize = 4096;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_HOPS: usize = 8;

pub const FLAG_QR: u16 = 0x8000;
pub const FLAG_RD: u16 = 0x0100;
pub const FLAG_RA: u16 = 0x0080;
const RCODE_MASK: u16 = 0x000F;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;
pub const RCODE_REFUSED: u8 = 5;

pub const CLASS_IN: u16 = 1;

/// Errors produced by the wire codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message does not fit the output buffer")]
    BufferFull,
    #[error("malformed DNS message")]
    Malformed,
}

/// Record/query type. Only A and AAAA are processed; everything else is
/// carried opaquely so the question can be echoed back in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    A,
    Aaaa,
    Other(u16),
}

impl QueryType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => QueryType::A,
            28 => QueryType::Aaaa,
            other => QueryType::Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            QueryType::A => 1,
            QueryType::Aaaa => 28,
            QueryType::Other(other) => other,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::A => write!(f, "A"),
            QueryType::Aaaa => write!(f, "AAAA"),
            QueryType::Other(other) => write!(f, "TYPE{other}"),
        }
    }
}

/// A resolved or synthesized IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::V4(ip) => ip.fmt(f),
            Address::V6(ip) => ip.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & RCODE_MASK) as u8
    }

    pub fn set_rcode(&mut self, rcode: u8) {
        self.flags = (self.flags & !RCODE_MASK) | u16::from(rcode);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: String,
    pub qtype: QueryType,
    pub qclass: u16,
}

/// An answer resource record. Only A/AAAA rdata is representable; other
/// record types are skipped during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub owner: String,
    pub rtype: QueryType,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> Result<u8, WireError> {
        let value = *self.data.get(self.pos).ok_or(WireError::Malformed)?;
        self.pos += 1;
        Ok(value)
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes([self.u8()?, self.u8()?, self.u8()?, self.u8()?]))
    }

    fn skip(&mut self, count: usize) -> Result<(), WireError> {
        if self.pos + count > self.data.len() {
            return Err(WireError::Malformed);
        }
        self.pos += count;
        Ok(())
    }

    /// Read a possibly-compressed name. The cursor advances past the name's
    /// in-place bytes; pointer targets are followed without moving it.
    fn name(&mut self) -> Result<String, WireError> {
        let mut name = String::new();
        let mut pos = self.pos;
        let mut hops = 0;
        let mut jumped = false;
        let mut encoded_len = 0usize;

        loop {
            let len = *self.data.get(pos).ok_or(WireError::Malformed)? as usize;

            if len & 0xC0 == 0xC0 {
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(WireError::Malformed);
                }
                let low = *self.data.get(pos + 1).ok_or(WireError::Malformed)? as usize;
                if !jumped {
                    self.pos = pos + 2;
                    jumped = true;
                }
                pos = (len & 0x3F) << 8 | low;
                continue;
            }
            if len == 0 {
                if !jumped {
                    self.pos = pos + 1;
                }
                return Ok(name);
            }
            if len > MAX_LABEL_LEN {
                return Err(WireError::Malformed);
            }
            encoded_len += len + 1;
            if encoded_len + 1 > MAX_NAME_LEN {
                return Err(WireError::Malformed);
            }
            let label = self
                .data
                .get(pos + 1..pos + 1 + len)
                .ok_or(WireError::Malformed)?;
            let label = std::str::from_utf8(label).map_err(|_| WireError::Malformed)?;
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(label);
            pos += 1 + len;
        }
    }
}

/// Decode a datagram into a message.
///
/// Answer records other than A/AAAA are skipped by their `rdlength`;
/// authority and additional sections are ignored.
pub fn decode(data: &[u8]) -> Result<Message, WireError> {
    if data.len() < HEADER_LEN {
        return Err(WireError::Malformed);
    }
    let mut reader = Reader { data, pos: 0 };

    let header = Header {
        id: reader.u16()?,
        flags: reader.u16()?,
        qdcount: reader.u16()?,
        ancount: reader.u16()?,
        nscount: reader.u16()?,
        arcount: reader.u16()?,
    };

    let mut questions = Vec::new();
    for _ in 0..header.qdcount {
        questions.push(Question {
            qname: reader.name()?,
            qtype: QueryType::from_u16(reader.u16()?),
            qclass: reader.u16()?,
        });
    }

    let mut answers = Vec::new();
    for _ in 0..header.ancount {
        let owner = reader.name()?;
        let rtype = QueryType::from_u16(reader.u16()?);
        let rclass = reader.u16()?;
        let ttl = reader.u32()?;
        let rdlength = reader.u16()? as usize;
        let rdata = match (rtype, rdlength) {
            (QueryType::A, 4) => {
                Address::V4(Ipv4Addr::new(reader.u8()?, reader.u8()?, reader.u8()?, reader.u8()?))
            }
            (QueryType::Aaaa, 16) => {
                let mut octets = [0u8; 16];
                for octet in &mut octets {
                    *octet = reader.u8()?;
                }
                Address::V6(Ipv6Addr::from(octets))
            }
            (QueryType::A, _) | (QueryType::Aaaa, _) => return Err(WireError::Malformed),
            (QueryType::Other(_), _) => {
                reader.skip(rdlength)?;
                continue;
            }
        };
        answers.push(Record { owner, rtype, rclass, ttl, rdata });
    }

    Ok(Message { header, questions, answers })
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn bytes(&mut self, data: &[u8]) -> Result<(), WireError> {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            return Err(WireError::BufferFull);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    fn u8(&mut self, value: u8) -> Result<(), WireError> {
        self.bytes(&[value])
    }

    fn u16(&mut self, value: u16) -> Result<(), WireError> {
        self.bytes(&value.to_be_bytes())
    }

    fn u32(&mut self, value: u32) -> Result<(), WireError> {
        self.bytes(&value.to_be_bytes())
    }

    fn name(&mut self, name: &str) -> Result<(), WireError> {
        if !name.is_empty() {
            for label in name.split('.') {
                let bytes = label.as_bytes();
                if bytes.is_empty() || bytes.len() > MAX_LABEL_LEN {
                    return Err(WireError::Malformed);
                }
                self.u8(bytes.len() as u8)?;
                self.bytes(bytes)?;
            }
        }
        self.u8(0)
    }
}

/// Encode a message into `buf`, returning the number of bytes written.
///
/// Section counts in the output are derived from the section lengths;
/// authority and additional sections are always empty.
pub fn encode(message: &Message, buf: &mut [u8]) -> Result<usize, WireError> {
    let mut writer = Writer { buf, pos: 0 };

    writer.u16(message.header.id)?;
    writer.u16(message.header.flags)?;
    writer.u16(message.questions.len() as u16)?;
    writer.u16(message.answers.len() as u16)?;
    writer.u16(0)?;
    writer.u16(0)?;

    for question in &message.questions {
        writer.name(&question.qname)?;
        writer.u16(question.qtype.to_u16())?;
        writer.u16(question.qclass)?;
    }

    for answer in &message.answers {
        writer.name(&answer.owner)?;
        writer.u16(answer.rtype.to_u16())?;
        writer.u16(answer.rclass)?;
        writer.u32(answer.ttl)?;
        match answer.rdata {
            Address::V4(ip) => {
                writer.u16(4)?;
                writer.bytes(&ip.octets())?;
            }
            Address::V6(ip) => {
                writer.u16(16)?;
                writer.bytes(&ip.octets())?;
            }
        }
    }

    Ok(writer.pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(id: u16, name: &str, qtype: QueryType) -> Message {
        Message {
            header: Header {
                id,
                flags: FLAG_RD,
                qdcount: 1,
                ..Header::default()
            },
            questions: vec![Question {
                qname: name.to_string(),
                qtype,
                qclass: CLASS_IN,
            }],
            answers: Vec::new(),
        }
    }

    #[test]
    fn round_trip_query() {
        let message = query(0x1234, "example.com", QueryType::A);
        let mut buf = [0u8; MAX_PACKET_SIZE];

        let len = encode(&message, &mut buf).unwrap();
        let decoded = decode(&buf[..len]).unwrap();

        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trip_response_with_answers() {
        let mut message = query(7, "a.example.org", QueryType::A);
        message.header.flags = FLAG_QR | FLAG_RD | FLAG_RA;
        message.header.ancount = 2;
        message.answers.push(Record {
            owner: "a.example.org".to_string(),
            rtype: QueryType::A,
            rclass: CLASS_IN,
            ttl: 300,
            rdata: Address::V4(Ipv4Addr::new(93, 184, 216, 34)),
        });
        message.answers.push(Record {
            owner: "a.example.org".to_string(),
            rtype: QueryType::Aaaa,
            rclass: CLASS_IN,
            ttl: 300,
            rdata: Address::V6(Ipv6Addr::LOCALHOST),
        });
        let mut buf = [0u8; MAX_PACKET_SIZE];

        let len = encode(&message, &mut buf).unwrap();
        let decoded = decode(&buf[..len]).unwrap();

        assert_eq!(decoded, message);
    }

    #[test]
    fn question_case_is_preserved() {
        let message = query(1, "ExAmPlE.CoM", QueryType::A);
        let mut buf = [0u8; MAX_PACKET_SIZE];

        let len = encode(&message, &mut buf).unwrap();
        let decoded = decode(&buf[..len]).unwrap();

        assert_eq!(decoded.questions[0].qname, "ExAmPlE.CoM");
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert_eq!(decode(&[0u8; 5]), Err(WireError::Malformed));
    }

    #[test]
    fn decode_rejects_truncated_question() {
        let message = query(9, "example.com", QueryType::A);
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = encode(&message, &mut buf).unwrap();

        assert_eq!(decode(&buf[..len - 3]), Err(WireError::Malformed));
    }

    #[test]
    fn decode_rejects_oversized_label() {
        let mut data = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        data.push(64); // one past the label limit
        data.extend_from_slice(&[b'a'; 64]);
        data.push(0);
        data.extend_from_slice(&[0, 1, 0, 1]);

        assert_eq!(decode(&data), Err(WireError::Malformed));
    }

    #[test]
    fn decode_rejects_oversized_name() {
        let mut data = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        // nine 30-byte labels push the encoded name past 255 octets
        for _ in 0..9 {
            data.push(30);
            data.extend_from_slice(&[b'x'; 30]);
        }
        data.push(0);
        data.extend_from_slice(&[0, 1, 0, 1]);

        assert_eq!(decode(&data), Err(WireError::Malformed));
    }

    #[test]
    fn decode_follows_compression_pointer() {
        let message = query(3, "example.com", QueryType::A);
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = encode(&message, &mut buf).unwrap();

        // append an answer whose owner points back at the question name
        let mut data = buf[..len].to_vec();
        data[7] = 1; // ancount
        data.extend_from_slice(&[0xC0, 0x0C]);
        data.extend_from_slice(&[0, 1, 0, 1]);
        data.extend_from_slice(&[0, 0, 1, 44]);
        data.extend_from_slice(&[0, 4, 127, 0, 0, 1]);

        let decoded = decode(&data).unwrap();
        assert_eq!(decoded.answers.len(), 1);
        assert_eq!(decoded.answers[0].owner, "example.com");
        assert_eq!(decoded.answers[0].rdata, Address::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn decode_rejects_pointer_loop() {
        let mut data = vec![0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        data.extend_from_slice(&[0xC0, 0x0C]); // points at itself
        data.extend_from_slice(&[0, 1, 0, 1]);

        assert_eq!(decode(&data), Err(WireError::Malformed));
    }

    #[test]
    fn decode_skips_unsupported_answer_types() {
        let message = query(4, "example.com", QueryType::A);
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = encode(&message, &mut buf).unwrap();

        let mut data = buf[..len].to_vec();
        data[7] = 2; // ancount
        // CNAME record, skipped by rdlength
        data.extend_from_slice(&[0xC0, 0x0C]);
        data.extend_from_slice(&[0, 5, 0, 1]);
        data.extend_from_slice(&[0, 0, 1, 44]);
        data.extend_from_slice(&[0, 3, 1, b'x', 0]);
        // A record, kept
        data.extend_from_slice(&[0xC0, 0x0C]);
        data.extend_from_slice(&[0, 1, 0, 1]);
        data.extend_from_slice(&[0, 0, 1, 44]);
        data.extend_from_slice(&[0, 4, 10, 0, 0, 1]);

        let decoded = decode(&data).unwrap();
        assert_eq!(decoded.answers.len(), 1);
        assert_eq!(decoded.answers[0].rtype, QueryType::A);
    }

    #[test]
    fn encode_fails_when_buffer_is_full() {
        let message = query(5, "example.com", QueryType::A);
        let mut buf = [0u8; 16];

        assert_eq!(encode(&message, &mut buf), Err(WireError::BufferFull));
    }

    #[test]
    fn rcode_accessors() {
        let mut header = Header {
            flags: FLAG_QR | FLAG_RA,
            ..Header::default()
        };

        header.set_rcode(RCODE_NXDOMAIN);

        assert_eq!(header.rcode(), RCODE_NXDOMAIN);
        assert_eq!(header.flags & FLAG_QR, FLAG_QR);
    }
}
