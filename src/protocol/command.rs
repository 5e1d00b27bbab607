//! Decoded memcached requests and their outcomes

use crate::CacheError;

/// Wire encoding of a request, chosen by its first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ascii,
    Binary,
}

/// Supported commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Get,
    Set,
}

impl CommandKind {
    /// Binary protocol opcode
    pub fn opcode(self) -> u8 {
        match self {
            CommandKind::Get => 0x00,
            CommandKind::Set => 0x01,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x00 => Some(CommandKind::Get),
            0x01 => Some(CommandKind::Set),
            _ => None,
        }
    }
}

/// Parsed request, borrowing key and value from the datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub protocol: Protocol,
    pub command: CommandKind,
    pub key: &'a [u8],
    /// Value payload; `None` for GET
    pub value: Option<&'a [u8]>,
    /// Binary opaque field, echoed in the reply (0 for ASCII)
    pub opaque: u32,
}

impl<'a> Request<'a> {
    pub fn get(protocol: Protocol, key: &'a [u8]) -> Self {
        Self {
            protocol,
            command: CommandKind::Get,
            key,
            value: None,
            opaque: 0,
        }
    }

    pub fn set(protocol: Protocol, key: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            protocol,
            command: CommandKind::Set,
            key,
            value: Some(value),
            opaque: 0,
        }
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }
}

/// Result of executing a request against the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<'v> {
    /// GET hit
    Value(&'v [u8]),
    /// SET succeeded
    Stored,
    /// Miss or store failure
    Error(CacheError),
}
