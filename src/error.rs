use std::io;
use std::num::ParseIntError;
use std::str::Utf8Error;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error as ThisError;

use crate::frame::FrameType;

/// Everything that can go wrong while encoding, decoding or talking to a server.
///
/// Transport (`Io`, `Timeout`) and `Protocol` errors are fatal for a connection: the first one is
/// latched and handed back by every later call. The remaining variants are local to the call that
/// produced them.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    #[error("{0}")]
    Io(Arc<io::Error>),
    #[error("i/o deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("protocol error; {0} (possible server error or unsupported concurrent read by application)")]
    Protocol(#[from] ProtocolError),
    /// Error reply sent by the server. The connection stays usable.
    #[error("{0}")]
    Server(String),
    #[error("connection closed")]
    Closed,
    #[error("unsupported argument type: {0}")]
    UnsupportedArgument(&'static str),
    #[error("{kind} frame can not convert to {target}")]
    Conversion { kind: FrameType, target: &'static str },
    #[error("invalid integer; {0}")]
    InvalidInteger(#[from] ParseIntError),
    #[error("invalid boolean {0:?}")]
    InvalidBool(String),
    #[error("invalid UTF-8 string; {0}")]
    InvalidUtf8(#[from] Utf8Error),
    #[error("multi frame of length {0} can not convert to a key/value map")]
    OddMapLength(usize),
    #[error("invalid configuration; {0}")]
    Config(String),
}

impl Error {
    /// Whether this error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout(_) | Error::Protocol(_) | Error::Closed
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(Arc::new(err))
    }
}

/// Violations of the wire grammar. Once one happens the byte stream is misaligned.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ProtocolError {
    #[error("long response line")]
    LongLine,
    #[error("bad response line terminator")]
    BadTerminator,
    #[error("short response line")]
    ShortLine,
    #[error("illegal data from server, unexpected prefix {0:#04x}")]
    IllegalData(u8),
    #[error("malformed length")]
    MalformedLength,
    #[error("illegal bytes in length")]
    IllegalLength,
    #[error("malformed integer {text:?}: {reason}")]
    MalformedInteger { text: String, reason: String },
    #[error("bulk string of {0} bytes exceeds limit")]
    BulkTooLarge(usize),
    #[error("truncated bulk string")]
    TruncatedBulk,
    #[error("bad bulk string format")]
    BadBulkFormat,
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
    #[error("invalid UTF-8 in line")]
    InvalidUtf8,
}
