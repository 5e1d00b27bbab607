//! Memcached binary protocol framing
//!
//! Every packet starts with a 24-byte header, multi-byte fields in network
//! order:
//!
//! ```text
//! 0      magic (0x80 request, 0x81 response)
//! 1      opcode
//! 2..4   key length
//! 4      extras length
//! 5      data type
//! 6..8   reserved (request) / status (response)
//! 8..12  total body length (extras + key + value)
//! 12..16 opaque
//! 16..24 CAS
//! ```
//!
//! followed by extras, key and value in that order.

use crate::ProtocolError;
use crate::protocol::command::{CommandKind, Protocol, Request};
use bytes::{Buf, BufMut, BytesMut};

pub const HEADER_LEN: usize = 24;

pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

/// Response status codes
pub mod status {
    pub const NO_ERROR: u16 = 0x00;
    pub const KEY_NOT_FOUND: u16 = 0x01;
    pub const ITEM_NOT_STORED: u16 = 0x05;
    pub const OUT_OF_MEMORY: u16 = 0x08;
}

/// Packet header, shared by requests and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    /// `reserved` in requests, `status` in responses
    pub status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    /// Decode a header from the front of `buf`
    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }

        Ok(Self {
            magic: buf.get_u8(),
            opcode: buf.get_u8(),
            key_len: buf.get_u16(),
            extras_len: buf.get_u8(),
            data_type: buf.get_u8(),
            status: buf.get_u16(),
            body_len: buf.get_u32(),
            opaque: buf.get_u32(),
            cas: buf.get_u64(),
        })
    }

    /// Response header for `opcode` carrying `body_len` bytes of value
    pub fn response(opcode: u8, status: u16, body_len: u32, opaque: u32) -> Self {
        Self {
            magic: MAGIC_RESPONSE,
            opcode,
            status,
            body_len,
            opaque,
            ..Self::default()
        }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(HEADER_LEN);
        out.put_u8(self.magic);
        out.put_u8(self.opcode);
        out.put_u16(self.key_len);
        out.put_u8(self.extras_len);
        out.put_u8(self.data_type);
        out.put_u16(self.status);
        out.put_u32(self.body_len);
        out.put_u32(self.opaque);
        out.put_u64(self.cas);
    }
}

/// Take `len` bytes off the front of `rest`
fn take<'a>(rest: &mut &'a [u8], len: usize, section: &'static str) -> Result<&'a [u8], ProtocolError> {
    if rest.len() < len {
        return Err(ProtocolError::Truncated {
            section,
            needed: len,
            available: rest.len(),
        });
    }
    let slice: &'a [u8] = rest;
    let (head, tail) = slice.split_at(len);
    *rest = tail;
    Ok(head)
}

/// Parse a binary GET or SET request
///
/// Extras (flags, expiry) are skipped. A GET whose body length is shorter
/// than its key and extras reads as carrying no value; a SET is rejected.
pub fn parse(buf: &[u8]) -> Result<Request<'_>, ProtocolError> {
    let header = Header::decode(buf)?;

    let command = CommandKind::from_opcode(header.opcode).ok_or_else(|| {
        ProtocolError::UnsupportedCommand(format!("opcode 0x{:02x}", header.opcode))
    })?;

    let key_len = usize::from(header.key_len);
    let extras_len = usize::from(header.extras_len);
    let body_len = header.body_len as usize;
    let value_len = match command {
        CommandKind::Get => body_len.saturating_sub(key_len + extras_len),
        CommandKind::Set => body_len
            .checked_sub(key_len + extras_len)
            .ok_or(ProtocolError::InvalidBodyLength)?,
    };

    let mut rest = &buf[HEADER_LEN..];
    take(&mut rest, extras_len, "extras")?;
    let key = take(&mut rest, key_len, "key")?;
    let value = take(&mut rest, value_len, "value")?;

    let request = match command {
        CommandKind::Get => Request::get(Protocol::Binary, key),
        CommandKind::Set => Request::set(Protocol::Binary, key, value),
    };

    Ok(request.with_opaque(header.opaque))
}

/// Write a complete request packet for `command` into `out`
pub fn encode_request(
    out: &mut BytesMut,
    command: CommandKind,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
    opaque: u32,
) {
    let header = Header {
        magic: MAGIC_REQUEST,
        opcode: command.opcode(),
        key_len: key.len() as u16,
        extras_len: extras.len() as u8,
        body_len: (extras.len() + key.len() + value.len()) as u32,
        opaque,
        ..Header::default()
    };
    header.encode(out);
    out.extend_from_slice(extras);
    out.extend_from_slice(key);
    out.extend_from_slice(value);
}

/// A decoded response packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response<'a> {
    pub header: Header,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// Decode a response packet, checking every section is present
pub fn decode_response(buf: &[u8]) -> Result<Response<'_>, ProtocolError> {
    let header = Header::decode(buf)?;
    if header.magic != MAGIC_RESPONSE {
        return Err(ProtocolError::BadMagic(header.magic));
    }

    let key_len = usize::from(header.key_len);
    let extras_len = usize::from(header.extras_len);
    let value_len = (header.body_len as usize)
        .checked_sub(key_len + extras_len)
        .ok_or(ProtocolError::InvalidBodyLength)?;

    let mut rest = &buf[HEADER_LEN..];
    take(&mut rest, extras_len, "extras")?;
    let key = take(&mut rest, key_len, "key")?;
    let value = take(&mut rest, value_len, "value")?;

    Ok(Response { header, key, value })
}
