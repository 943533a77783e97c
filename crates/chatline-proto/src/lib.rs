//! Chatline wire protocol.
//!
//! Shared by the server and the client:
//!
//! - [`transport`]: buffered newline framing over any `Read + Write` stream,
//!   plus a fixed-length binary read for payloads that follow a command line
//! - [`codec`]: client command parsing and server event encoding
//!
//! The protocol is plain ASCII text, one command or event per line, with
//! lines of at most [`MAX_LINE_LEN`] bytes including the newline.

#![forbid(unsafe_code)]

pub mod codec;
mod error;
pub mod transport;

pub use codec::{Chat, Command, Event, OfflineNotice, RelayedMessage};
pub use error::ProtocolError;
pub use transport::{ExactRead, LineRead, LineTransport, RECV_BUFFER_CAPACITY};

/// Maximum protocol line length in bytes, delimiter included.
pub const MAX_LINE_LEN: usize = 512;

/// Default TCP port of a chatline server.
pub const DEFAULT_PORT: u16 = 1733;
