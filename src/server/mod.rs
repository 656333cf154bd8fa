//! Transport collaborators.
//!
//! - **protocol**: inbound command parsing and fault messages
//! - **connection**: per-client session registry
//! - **ws**: WebSocket listener on `/session`
//! - **stdio**: JSON lines over stdin/stdout

pub mod connection;
pub mod protocol;
pub mod stdio;
pub mod ws;

pub use connection::{Connection, ConnectionError};
pub use protocol::{Command, ProtocolError};
