//! Request decoding
//!
//! A datagram (envelope already stripped) holds exactly one request. A leading
//! `0x80` selects the binary protocol; anything else is parsed as an ASCII
//! command line:
//!
//! ```text
//! <command> <key> <flags> <exptime> <bytes> [noreply]\r\n
//! [<bytes> bytes of data]\r\n
//! ```
//!
//! Only `command`, `key` and `bytes` are used. `flags`, `exptime` and
//! `noreply` must be present positionally for `set` but are otherwise ignored.

use crate::ProtocolError;
use crate::protocol::binary::{self, MAGIC_REQUEST};
use crate::protocol::command::{Protocol, Request};

/// Minimum tokens for a well-formed `get` line
const GET_TOKENS: usize = 2;
/// Minimum tokens for a well-formed `set` line
const SET_TOKENS: usize = 5;

/// Case-insensitive command comparison (avoids allocation from to_ascii_lowercase)
#[inline]
fn cmd_eq(cmd: &[u8], expected: &[u8]) -> bool {
    cmd.eq_ignore_ascii_case(expected)
}

/// Which protocol a request buffer uses
#[inline]
pub fn detect(buf: &[u8]) -> Protocol {
    if buf.first() == Some(&MAGIC_REQUEST) {
        Protocol::Binary
    } else {
        Protocol::Ascii
    }
}

/// Parse one request from a buffer
pub fn parse(buf: &[u8]) -> Result<Request<'_>, ProtocolError> {
    match detect(buf) {
        Protocol::Binary => binary::parse(buf),
        Protocol::Ascii => parse_ascii(buf),
    }
}

/// Parse an ASCII `get` or `set`
pub fn parse_ascii(buf: &[u8]) -> Result<Request<'_>, ProtocolError> {
    let line_end = memchr::memchr(b'\n', buf).ok_or(ProtocolError::MissingNewline)?;
    let line = &buf[..line_end];

    // '\r' only ever shows up as the terminator, so it splits like a space
    let mut tokens = line
        .split(|&b| b == b' ' || b == b'\r')
        .filter(|token| !token.is_empty());

    let cmd_name = tokens.next().ok_or(ProtocolError::TooFewTokens {
        expected: GET_TOKENS,
        found: 0,
    })?;

    if cmd_eq(cmd_name, b"get") {
        let key = tokens.next().ok_or(ProtocolError::TooFewTokens {
            expected: GET_TOKENS,
            found: 1,
        })?;
        Ok(Request::get(Protocol::Ascii, key))
    } else if cmd_eq(cmd_name, b"set") {
        // <key> <flags> <exptime> <bytes>
        let mut fields: [&[u8]; SET_TOKENS - 1] = [b"".as_slice(); SET_TOKENS - 1];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = tokens.next().ok_or(ProtocolError::TooFewTokens {
                expected: SET_TOKENS,
                found: i + 1,
            })?;
        }
        let [key, _flags, _exptime, bytes] = fields;

        let bytes = parse_usize(bytes).ok_or(ProtocolError::InvalidBytesLength)?;

        let data_start = line_end + 1;
        let available = buf.len() - data_start;
        if available < bytes {
            return Err(ProtocolError::Truncated {
                section: "value",
                needed: bytes,
                available,
            });
        }

        Ok(Request::set(
            Protocol::Ascii,
            key,
            &buf[data_start..data_start + bytes],
        ))
    } else {
        Err(ProtocolError::UnsupportedCommand(
            String::from_utf8_lossy(cmd_name).to_string(),
        ))
    }
}

/// Parse bytes as usize
fn parse_usize(bytes: &[u8]) -> Option<usize> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
