//! UDP frame header
//!
//! Every memcached UDP datagram carries an 8-byte header in front of the
//! request or reply: request id, sequence number, total datagram count and a
//! reserved field, all big-endian `u16`s.

use bytes::{Buf, BufMut, BytesMut};

pub const ENVELOPE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub request_id: u16,
    pub sequence: u16,
    pub count: u16,
    pub reserved: u16,
}

impl Envelope {
    /// Decode the header at the front of a datagram
    ///
    /// Returns `None` when fewer than [`ENVELOPE_LEN`] bytes are present.
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < ENVELOPE_LEN {
            return None;
        }
        Some(Self {
            request_id: buf.get_u16(),
            sequence: buf.get_u16(),
            count: buf.get_u16(),
            reserved: buf.get_u16(),
        })
    }

    /// Header for the single datagram answering `request_id`
    pub fn reply(request_id: u16) -> Self {
        Self {
            request_id,
            sequence: 0,
            count: 1,
            reserved: 0,
        }
    }

    /// Header for a request that fits in one datagram
    pub fn request(request_id: u16) -> Self {
        Self::reply(request_id)
    }

    /// Requests spread over several datagrams are not reassembled
    #[inline]
    pub fn is_fragmented(&self) -> bool {
        self.count > 1
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(ENVELOPE_LEN);
        out.put_u16(self.request_id);
        out.put_u16(self.sequence);
        out.put_u16(self.count);
        out.put_u16(self.reserved);
    }
}
