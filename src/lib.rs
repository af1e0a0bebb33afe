//! A client-side codec and pipelined connection for RESP, the Redis serialization protocol.

pub mod config;
pub mod connection;
pub mod decode;
pub mod encode;
pub mod error;
pub mod frame;
pub mod reply;
mod wire;

pub use config::{Config, Limits};
pub use connection::{Connection, Outcome};
pub use decode::{decode, Decoder};
pub use encode::{encode, Arg};
pub use error::{Error, ProtocolError};
pub use frame::{Frame, FrameType};
pub use reply::Reply;

pub type Result<T, E = Error> = std::result::Result<T, E>;
