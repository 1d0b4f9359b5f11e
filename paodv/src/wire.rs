//! Wire format serialization and deserialization.
//!
//! Cursor-based, big-endian encoding. Every message starts with a one-byte
//! type tag.
//!
//! ```text
//! RREQ (1): type | flags | ttl | hop_count | rreq_id(4) | dst(4) | dst_seq(4)
//!           | orig(4) | orig_seq(4) | ext*
//! RREP (2): type | flags | prefix_size | hop_count | dst(4) | dst_seq(4)
//!           | orig(4) | lifetime_ms(4) | ext*
//! RERR (3): type | flags | reserved | dest_count | dest_count x (addr(4) | seq(4))
//! ACK  (4): type | reserved
//! DATA (5): type | ttl | src(4) | dst(4) | payload_len(2) | payload
//!
//! ext: ext_type(1) | ext_len(1) | value(ext_len)
//!
//! RREQ flags: 0x80 J, 0x40 R (unsupported), 0x20 gratuitous,
//!             0x10 destination-only, 0x08 unknown sequence
//! RREP flags: 0x80 R (unsupported), 0x40 ack required
//! RERR flags: 0x80 no-delete
//! ```
//!
//! A hello is an RREP whose destination and originator are the sender and
//! whose hop count is zero. It has no tag of its own.

use alloc::vec::Vec;
use core::net::Ipv4Addr;

use crate::seqno::SeqNo;
use crate::time::Duration;
use crate::types::{Addr, Data, Position, Rerr, Rrep, RrepAck, Rreq, EXT_POSITION};

/// Decoding error types. Any of them makes the message malformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    /// A declared length disagrees with the buffer, or trailing bytes.
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid message type")]
    InvalidMessageType,
    #[error("invalid or unsupported flags")]
    InvalidFlags,
    #[error("invalid field value")]
    InvalidValue,
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Returns true if there are no more bytes to read.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_addr(&mut self) -> Result<Addr, DecodeError> {
        Ok(Ipv4Addr::from(self.read_u32_be()?))
    }

    pub fn read_seqno(&mut self) -> Result<SeqNo, DecodeError> {
        Ok(SeqNo(self.read_u32_be()?))
    }

    /// Read a finite IEEE-754 single.
    pub fn read_f32_be(&mut self) -> Result<f32, DecodeError> {
        let v = f32::from_bits(self.read_u32_be()?);
        if !v.is_finite() {
            return Err(DecodeError::InvalidValue);
        }
        Ok(v)
    }
}

/// Writer for encoding messages.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_addr(&mut self, addr: Addr) {
        self.write_bytes(&addr.octets());
    }

    pub fn write_seqno(&mut self, seq: SeqNo) {
        self.write_u32_be(seq.get());
    }

    pub fn write_f32_be(&mut self, v: f32) {
        self.write_u32_be(v.to_bits());
    }

    /// Finish writing and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

// Message type discriminators for the wire format
pub const WIRE_TYPE_RREQ: u8 = 1;
pub const WIRE_TYPE_RREP: u8 = 2;
pub const WIRE_TYPE_RERR: u8 = 3;
pub const WIRE_TYPE_RREP_ACK: u8 = 4;
pub const WIRE_TYPE_DATA: u8 = 5;

const RREQ_FLAG_JOIN: u8 = 0x80;
const RREQ_FLAG_REPAIR: u8 = 0x40;
const RREQ_FLAG_GRATUITOUS: u8 = 0x20;
const RREQ_FLAG_DEST_ONLY: u8 = 0x10;
const RREQ_FLAG_UNKNOWN_SEQ: u8 = 0x08;
const RREQ_FLAGS_RESERVED: u8 = 0x07;

const RREP_FLAG_REPAIR: u8 = 0x80;
const RREP_FLAG_ACK: u8 = 0x40;
const RREP_FLAGS_RESERVED: u8 = 0x3F;
const RREP_PREFIX_MASK: u8 = 0x1F;

const RERR_FLAG_NO_DELETE: u8 = 0x80;

const POSITION_EXT_LEN: u8 = 8;

/// Largest destination list a single RERR can carry.
pub const MAX_RERR_DESTINATIONS: usize = u8::MAX as usize;

/// Top-level message, discriminated by the leading type tag.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Rreq(Rreq),
    Rrep(Rrep),
    Rerr(Rerr),
    RrepAck(RrepAck),
    Data(Data),
}

fn write_extensions(w: &mut Writer, position: Option<Position>) {
    if let Some(p) = position {
        w.write_u8(EXT_POSITION);
        w.write_u8(POSITION_EXT_LEN);
        w.write_f32_be(p.x);
        w.write_f32_be(p.y);
    }
}

/// Read extensions up to the end of the buffer. Unknown types are skipped.
fn read_extensions(r: &mut Reader<'_>) -> Result<Option<Position>, DecodeError> {
    let mut position = None;
    while !r.is_empty() {
        let ext_type = r.read_u8()?;
        let len = r.read_u8()? as usize;
        if len > r.remaining() {
            return Err(DecodeError::InvalidLength);
        }
        let value = r.read_bytes(len)?;
        if ext_type == EXT_POSITION {
            if len != POSITION_EXT_LEN as usize {
                return Err(DecodeError::InvalidLength);
            }
            let mut inner = Reader::new(value);
            let x = inner.read_f32_be()?;
            let y = inner.read_f32_be()?;
            position = Some(Position { x, y });
        }
    }
    Ok(position)
}

impl Encode for Rreq {
    fn encode(&self, w: &mut Writer) {
        let mut flags = 0u8;
        if self.gratuitous {
            flags |= RREQ_FLAG_GRATUITOUS;
        }
        if self.destination_only {
            flags |= RREQ_FLAG_DEST_ONLY;
        }
        if self.unknown_seq {
            flags |= RREQ_FLAG_UNKNOWN_SEQ;
        }
        w.write_u8(flags);
        w.write_u8(self.ttl);
        w.write_u8(self.hop_count);
        w.write_u32_be(self.request_id);
        w.write_addr(self.destination);
        w.write_seqno(self.dest_seq);
        w.write_addr(self.originator);
        w.write_seqno(self.orig_seq);
        write_extensions(w, self.position);
    }
}

impl Decode for Rreq {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let flags = r.read_u8()?;
        if flags & (RREQ_FLAG_JOIN | RREQ_FLAG_REPAIR | RREQ_FLAGS_RESERVED) != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let ttl = r.read_u8()?;
        let hop_count = r.read_u8()?;
        let request_id = r.read_u32_be()?;
        let destination = r.read_addr()?;
        let dest_seq = r.read_seqno()?;
        let originator = r.read_addr()?;
        let orig_seq = r.read_seqno()?;
        let position = read_extensions(r)?;

        Ok(Rreq {
            gratuitous: flags & RREQ_FLAG_GRATUITOUS != 0,
            destination_only: flags & RREQ_FLAG_DEST_ONLY != 0,
            unknown_seq: flags & RREQ_FLAG_UNKNOWN_SEQ != 0,
            ttl,
            hop_count,
            request_id,
            destination,
            dest_seq,
            originator,
            orig_seq,
            position,
        })
    }
}

impl Encode for Rrep {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(if self.ack_required { RREP_FLAG_ACK } else { 0 });
        w.write_u8(self.prefix_size & RREP_PREFIX_MASK);
        w.write_u8(self.hop_count);
        w.write_addr(self.destination);
        w.write_seqno(self.dest_seq);
        w.write_addr(self.originator);
        w.write_u32_be(self.lifetime.as_millis_u32());
        write_extensions(w, self.position);
    }
}

impl Decode for Rrep {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let flags = r.read_u8()?;
        if flags & (RREP_FLAG_REPAIR | RREP_FLAGS_RESERVED) != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let prefix_size = r.read_u8()?;
        if prefix_size & !RREP_PREFIX_MASK != 0 {
            return Err(DecodeError::InvalidValue);
        }
        let hop_count = r.read_u8()?;
        let destination = r.read_addr()?;
        let dest_seq = r.read_seqno()?;
        let originator = r.read_addr()?;
        let lifetime = Duration::from_millis(r.read_u32_be()? as u64);
        let position = read_extensions(r)?;

        Ok(Rrep {
            ack_required: flags & RREP_FLAG_ACK != 0,
            prefix_size,
            hop_count,
            destination,
            dest_seq,
            originator,
            lifetime,
            position,
        })
    }
}

impl Encode for Rerr {
    fn encode(&self, w: &mut Writer) {
        let count = self.unreachable.len().min(MAX_RERR_DESTINATIONS);
        w.write_u8(if self.no_delete { RERR_FLAG_NO_DELETE } else { 0 });
        w.write_u8(0);
        w.write_u8(count as u8);
        for (addr, seq) in self.unreachable.iter().take(count) {
            w.write_addr(*addr);
            w.write_seqno(*seq);
        }
    }
}

impl Decode for Rerr {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let flags = r.read_u8()?;
        if flags & !RERR_FLAG_NO_DELETE != 0 {
            return Err(DecodeError::InvalidFlags);
        }
        let _reserved = r.read_u8()?;
        let count = r.read_u8()? as usize;
        if count == 0 {
            return Err(DecodeError::InvalidLength);
        }
        if count * 8 > r.remaining() {
            return Err(DecodeError::InvalidLength);
        }
        let mut unreachable = Vec::with_capacity(count);
        for _ in 0..count {
            let addr = r.read_addr()?;
            let seq = r.read_seqno()?;
            unreachable.push((addr, seq));
        }
        Ok(Rerr {
            no_delete: flags & RERR_FLAG_NO_DELETE != 0,
            unreachable,
        })
    }
}

impl Encode for RrepAck {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(0);
    }
}

impl Decode for RrepAck {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let _reserved = r.read_u8()?;
        Ok(RrepAck)
    }
}

impl Encode for Data {
    fn encode(&self, w: &mut Writer) {
        let len = self.payload.len().min(u16::MAX as usize);
        w.write_u8(self.ttl);
        w.write_addr(self.source);
        w.write_addr(self.destination);
        w.write_u16_be(len as u16);
        w.write_bytes(&self.payload[..len]);
    }
}

impl Decode for Data {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let ttl = r.read_u8()?;
        let source = r.read_addr()?;
        let destination = r.read_addr()?;
        let len = r.read_u16_be()? as usize;
        if len > r.remaining() {
            return Err(DecodeError::InvalidLength);
        }
        let payload = r.read_bytes(len)?.to_vec();
        Ok(Data {
            ttl,
            source,
            destination,
            payload,
        })
    }
}

impl Encode for Message {
    fn encode(&self, w: &mut Writer) {
        match self {
            Message::Rreq(m) => {
                w.write_u8(WIRE_TYPE_RREQ);
                m.encode(w);
            }
            Message::Rrep(m) => {
                w.write_u8(WIRE_TYPE_RREP);
                m.encode(w);
            }
            Message::Rerr(m) => {
                w.write_u8(WIRE_TYPE_RERR);
                m.encode(w);
            }
            Message::RrepAck(m) => {
                w.write_u8(WIRE_TYPE_RREP_ACK);
                m.encode(w);
            }
            Message::Data(m) => {
                w.write_u8(WIRE_TYPE_DATA);
                m.encode(w);
            }
        }
    }
}

impl Decode for Message {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.read_u8()? {
            WIRE_TYPE_RREQ => Ok(Message::Rreq(Rreq::decode(r)?)),
            WIRE_TYPE_RREP => Ok(Message::Rrep(Rrep::decode(r)?)),
            WIRE_TYPE_RERR => Ok(Message::Rerr(Rerr::decode(r)?)),
            WIRE_TYPE_RREP_ACK => Ok(Message::RrepAck(RrepAck::decode(r)?)),
            WIRE_TYPE_DATA => Ok(Message::Data(Data::decode(r)?)),
            _ => Err(DecodeError::InvalidMessageType),
        }
    }
}
