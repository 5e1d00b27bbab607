//! Memcached wire protocols: UDP frame header, ASCII and binary requests

pub mod binary;
pub mod command;
pub mod envelope;
pub mod parser;
pub mod response;

pub use command::{CommandKind, Protocol, Reply, Request};
pub use envelope::{ENVELOPE_LEN, Envelope};
pub use parser::{detect, parse};
pub use response::ResponseWriter;
