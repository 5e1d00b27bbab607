//! Error types for bucketcache

use crate::protocol::binary::status;
use thiserror::Error;

/// Main error type for bucketcache
#[derive(Error, Debug)]
pub enum BucketCacheError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Request decoding errors
///
/// Every variant is terminal for the request: the engine drops the datagram
/// without replying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Truncated header: need {needed} bytes, have {available}")]
    TruncatedHeader { needed: usize, available: usize },

    #[error("Missing line terminator")]
    MissingNewline,

    #[error("Too few tokens: expected at least {expected}, found {found}")]
    TooFewTokens { expected: usize, found: usize },

    #[error("Invalid bytes length")]
    InvalidBytesLength,

    #[error("Invalid body length")]
    InvalidBodyLength,

    #[error("Unexpected magic byte 0x{0:02x}")]
    BadMagic(u8),

    #[error("Truncated {section}: need {needed} bytes, have {available}")]
    Truncated {
        section: &'static str,
        needed: usize,
        available: usize,
    },
}

impl ProtocolError {
    /// Returns true if the request was well framed but named a command we don't serve
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProtocolError::UnsupportedCommand(_))
    }
}

/// Cache (allocator and index) errors
///
/// These are data-level outcomes: they are encoded into the reply rather than
/// aborting the worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Item of {requested} bytes exceeds largest size class ({max} bytes)")]
    TooLarge { requested: usize, max: usize },

    #[error("Out of memory")]
    OutOfMemory,
}

impl CacheError {
    /// Binary protocol status code for this error
    ///
    /// Oversized items are reported as item-not-stored.
    ///
    /// Also used as the `<code>` in textual `SERVER ERROR <code>` replies.
    pub fn status(&self) -> u16 {
        match self {
            CacheError::KeyNotFound => status::KEY_NOT_FOUND,
            CacheError::TooLarge { .. } => status::ITEM_NOT_STORED,
            CacheError::OutOfMemory => status::OUT_OF_MEMORY,
        }
    }
}

pub type Result<T> = std::result::Result<T, BucketCacheError>;
