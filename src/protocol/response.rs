//! Reply encoding for both wire formats

use crate::CacheError;
use crate::protocol::binary::{Header, status};
use crate::protocol::command::{CommandKind, Protocol, Reply, Request};
use crate::protocol::envelope::Envelope;
use bytes::{Bytes, BytesMut};
use itoa::Buffer;

/// Accumulates one datagram's worth of reply bytes
///
/// The backing allocation is reused across requests: [`ResponseWriter::take`]
/// splits off the written bytes and keeps the spare capacity.
pub struct ResponseWriter {
    buf: BytesMut,
}

impl ResponseWriter {
    /// Create a new response writer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Take the written bytes, leaving the writer empty
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Write the UDP frame header of a reply
    pub fn envelope(&mut self, envelope: &Envelope) {
        envelope.encode(&mut self.buf);
    }

    /// Encode the reply to `request` in the request's own protocol
    pub fn reply(&mut self, request: &Request<'_>, reply: &Reply<'_>) {
        match request.protocol {
            Protocol::Ascii => self.ascii_reply(request, reply),
            Protocol::Binary => self.binary_reply(request, reply),
        }
    }

    fn ascii_reply(&mut self, request: &Request<'_>, reply: &Reply<'_>) {
        match (request.command, reply) {
            (_, Reply::Value(data)) => {
                self.value(request.key, data);
                self.end();
            }
            (_, Reply::Stored) => self.stored(),
            (CommandKind::Get, Reply::Error(CacheError::KeyNotFound)) => self.not_found(),
            (CommandKind::Set, Reply::Error(CacheError::OutOfMemory)) => self.not_stored(),
            (_, Reply::Error(err)) => self.server_error(err.status()),
        }
    }

    fn binary_reply(&mut self, request: &Request<'_>, reply: &Reply<'_>) {
        let opcode = request.command.opcode();
        match reply {
            Reply::Value(data) => self.binary(opcode, status::NO_ERROR, request.opaque, data),
            Reply::Stored => self.binary(opcode, status::NO_ERROR, request.opaque, &[]),
            Reply::Error(err) => self.binary(opcode, err.status(), request.opaque, &[]),
        }
    }

    /// Write a VALUE line and its data block
    /// Format: VALUE <key> 0 <bytes>\r\n<data>\r\n
    pub fn value(&mut self, key: &[u8], data: &[u8]) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(b"VALUE ");
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(b" 0 ");
        self.buf
            .extend_from_slice(itoa_buf.format(data.len()).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write END to terminate get response
    pub fn end(&mut self) {
        self.buf.extend_from_slice(b"END\r\n");
    }

    /// Write STORED response
    pub fn stored(&mut self) {
        self.buf.extend_from_slice(b"STORED\r\n");
    }

    /// Write NOT_STORED response
    pub fn not_stored(&mut self) {
        self.buf.extend_from_slice(b"NOT_STORED\r\n");
    }

    /// Write NOT_FOUND response
    pub fn not_found(&mut self) {
        self.buf.extend_from_slice(b"NOT_FOUND\r\n");
    }

    /// Write SERVER ERROR response
    /// Format: SERVER ERROR <code>\r\n
    pub fn server_error(&mut self, code: u16) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(b"SERVER ERROR ");
        self.buf.extend_from_slice(itoa_buf.format(code).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Write a binary response header followed by `body`
    pub fn binary(&mut self, opcode: u8, status: u16, opaque: u32, body: &[u8]) {
        // Body length is bounded by the largest size class
        let header = Header::response(opcode, status, body.len() as u32, opaque);
        header.encode(&mut self.buf);
        self.buf.extend_from_slice(body);
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new(4096)
    }
}
