//! Client error types.

use std::io;

use chatline_proto::ProtocolError;
use thiserror::Error;

/// Errors from talking to a chatline server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The address resolved to nothing.
    #[error("address resolved to no socket addresses")]
    NoAddress,

    /// Connecting, reading or writing failed.
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// No line arrived within the read timeout.
    #[error("timed out waiting for the server")]
    Timeout,

    /// A server line did not fit the receive buffer.
    #[error("server line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Outgoing text cannot be framed as a single command.
    #[error("invalid outgoing text: {0}")]
    InvalidText(&'static str),

    /// A server line could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
