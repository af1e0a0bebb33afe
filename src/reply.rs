use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;

use crate::wire::Assemble;
use crate::{Error, Result};

/// `+OK`, shared by every reply that carries it.
pub const OK: Reply = Reply::Status(Cow::Borrowed("OK"));
/// `+PONG`, shared by every reply that carries it.
pub const PONG: Reply = Reply::Status(Cow::Borrowed("PONG"));

/// A reply as returned by [`Connection`](crate::connection::Connection).
///
/// Unlike [`Frame`](crate::frame::Frame) there is a single `Nil` for both null bulk strings and
/// null multi-bulks.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Nil,
    Status(Cow<'static, str>),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Status(s) => Some(s.as_bytes()),
            Reply::Bulk(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Turns an error reply into `Err(Error::Server)`.
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(msg) => Err(Error::Server(msg)),
            reply => Ok(reply),
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Reply::Nil => write!(f, "(nil)"),
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(msg) => write!(f, "(error) {}", msg),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => write!(f, "{:?}", String::from_utf8_lossy(data)),
            Reply::Array(items) if items.is_empty() => write!(f, "(empty array)"),
            Reply::Array(items) => {
                // Right-align the indices so nested items line up, like redis-cli.
                let width = items.len().to_string().len();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, "\n{:indent$}", "", indent = indent)?;
                    }
                    write!(f, "{:>width$}) ", i + 1, width = width)?;
                    item.fmt_indented(f, indent + width + 2)?;
                }
                Ok(())
            }
        }
    }
}

impl Assemble for Reply {
    fn status(text: &str) -> Self {
        match text {
            "OK" => OK,
            "PONG" => PONG,
            _ => Reply::Status(Cow::Owned(text.to_string())),
        }
    }

    fn error(text: &str) -> Self {
        Reply::Error(text.to_string())
    }

    fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    fn bulk(data: Option<Bytes>) -> Self {
        data.map_or(Reply::Nil, Reply::Bulk)
    }

    fn multi(items: Option<Vec<Self>>) -> Self {
        items.map_or(Reply::Nil, Reply::Array)
    }
}

/// Renders the reply the way `redis-cli` does.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
